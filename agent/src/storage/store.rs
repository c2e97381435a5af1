//! Durable key/value storage for the deployment checkpoint

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::EnrollError;
use crate::filesys::file::File;

/// Well-known key under which the deployment checkpoint is stored
pub const STATE_KEY: &str = "deployment-state";

/// Durable storage used for state persistence
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the bytes stored under `key`, `None` if absent
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, EnrollError>;

    /// Replace the bytes stored under `key`
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), EnrollError>;

    /// Remove `key`; removing an absent key succeeds
    async fn delete(&self, key: &str) -> Result<(), EnrollError>;
}

/// Stores each key as one file.
///
/// Keys map to files through an explicit table; unknown keys land in
/// `<base_dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
    files: HashMap<String, File>,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            files: HashMap::new(),
        }
    }

    /// Store `key` in a specific file
    pub fn with_file(mut self, key: impl Into<String>, file: File) -> Self {
        self.files.insert(key.into(), file);
        self
    }

    /// The file backing `key`
    pub fn file_for(&self, key: &str) -> File {
        self.files
            .get(key)
            .cloned()
            .unwrap_or_else(|| File::new(self.base_dir.join(format!("{}.json", key))))
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, EnrollError> {
        self.file_for(key).read_bytes().await
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), EnrollError> {
        let file = self.file_for(key);
        file.write_atomic(bytes).await?;
        file.set_permissions_600().await
    }

    async fn delete(&self, key: &str) -> Result<(), EnrollError> {
        self.file_for(key).delete().await
    }
}

/// Volatile store, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current bytes under `key`
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Overwrite `key` directly
    pub fn put(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), bytes.into());
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, EnrollError> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), EnrollError> {
        self.put(key, bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), EnrollError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}
