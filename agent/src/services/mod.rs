//! Remote systems holding device records

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EnrollError;

/// The three external systems cleaned before registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSystem {
    /// Identity directory holding join/registration records
    Directory,
    /// MDM service holding enrolled-device records
    DeviceManagement,
    /// Zero-touch pre-registration keyed by hardware serial
    Provisioning,
}

impl RemoteSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteSystem::Directory => "directory",
            RemoteSystem::DeviceManagement => "device_management",
            RemoteSystem::Provisioning => "provisioning",
        }
    }
}

impl fmt::Display for RemoteSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device record as returned by a remote query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl RemoteRecord {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            serial_number: None,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }
}

/// Query/remove access to one remote system, provided by the embedding client
#[async_trait]
pub trait DeviceRecordService: Send + Sync {
    /// Records matching an identity key (serial number or device name)
    async fn find_by_identity(&self, key: &str) -> Result<Vec<RemoteRecord>, EnrollError>;

    /// Delete the record with the given remote id
    async fn remove(&self, id: &str) -> Result<(), EnrollError>;
}
