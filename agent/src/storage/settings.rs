//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::identity::expand_name_template;
use crate::errors::EnrollError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::retry::{RetryPatterns, RetryPolicy};

/// Upper bound on any post-cleanup propagation delay
pub const MAX_PROPAGATION_DELAY_SECS: u64 = 300;

/// Agent settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for the log file (stdout only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Retry behaviour for remote calls
    #[serde(default)]
    pub retry: RetrySettings,

    /// Secret store references for the authentication certificate
    #[serde(default)]
    pub key_vault: KeyVaultSettings,

    /// Stale record cleanup per remote system
    #[serde(default)]
    pub cleanup: CleanupSettings,

    /// Computer naming convention
    #[serde(default)]
    pub naming: NamingSettings,

    /// Checkpoint persistence
    #[serde(default)]
    pub state: StateSettings,
}

impl Settings {
    /// Load and validate settings from a JSON file
    pub async fn load(file: &File) -> Result<Self, EnrollError> {
        let settings = Self::read(file).await?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings for commands that only touch the local checkpoint.
    ///
    /// The secret store references are not required.
    pub async fn load_local(file: &File) -> Result<Self, EnrollError> {
        let settings = Self::read(file).await?;
        settings.validate_local()?;
        Ok(settings)
    }

    async fn read(file: &File) -> Result<Self, EnrollError> {
        file.read_json().await.map_err(|e| {
            EnrollError::ConfigError(format!(
                "unable to read settings from {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    /// Parse and validate settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self, EnrollError> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| EnrollError::ConfigError(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every bounded value
    pub fn validate(&self) -> Result<(), EnrollError> {
        self.key_vault.validate()?;
        self.validate_local()
    }

    fn validate_local(&self) -> Result<(), EnrollError> {
        self.retry.policy.validate()?;
        self.cleanup.directory.validate("directory")?;
        self.cleanup.device_management.validate("device_management")?;
        self.cleanup.provisioning.validate("provisioning")?;
        if let Some(template) = &self.naming.computer_name_template {
            expand_name_template(template, "0000")?;
        }
        if self.state.max_age_hours == 0 {
            return Err(EnrollError::ConfigError(
                "state.max_age_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry patterns, falling back to the default set
    pub fn retry_patterns(&self) -> RetryPatterns {
        RetryPatterns::from_config(&self.retry.retryable_patterns)
    }
}

/// Retry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(flatten)]
    pub policy: RetryPolicy,

    /// Message patterns treated as transient (default set when empty)
    #[serde(default)]
    pub retryable_patterns: Vec<String>,
}

/// Secret store references
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVaultSettings {
    #[serde(default)]
    pub vault_name: String,

    /// Secret holding the encoded certificate bundle
    #[serde(default)]
    pub certificate_secret: String,

    /// Secret holding the bundle password
    #[serde(default)]
    pub password_secret: String,

    /// Warn when the certificate expires within this many days
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: i64,
}

fn default_expiry_warning_days() -> i64 {
    30
}

impl Default for KeyVaultSettings {
    fn default() -> Self {
        Self {
            vault_name: String::new(),
            certificate_secret: String::new(),
            password_secret: String::new(),
            expiry_warning_days: default_expiry_warning_days(),
        }
    }
}

impl KeyVaultSettings {
    fn validate(&self) -> Result<(), EnrollError> {
        for (field, value) in [
            ("key_vault.vault_name", &self.vault_name),
            ("key_vault.certificate_secret", &self.certificate_secret),
            ("key_vault.password_secret", &self.password_secret),
        ] {
            if value.trim().is_empty() {
                return Err(EnrollError::ConfigError(format!("{} is required", field)));
            }
        }
        if !(0..=365).contains(&self.expiry_warning_days) {
            return Err(EnrollError::ConfigError(format!(
                "key_vault.expiry_warning_days must be within [0, 365], got {}",
                self.expiry_warning_days
            )));
        }
        Ok(())
    }
}

/// Cleanup settings for all remote systems
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSettings {
    #[serde(default = "default_directory_cleanup")]
    pub directory: SystemCleanupSettings,

    #[serde(default = "default_device_management_cleanup")]
    pub device_management: SystemCleanupSettings,

    #[serde(default = "default_provisioning_cleanup")]
    pub provisioning: SystemCleanupSettings,
}

fn default_directory_cleanup() -> SystemCleanupSettings {
    SystemCleanupSettings::with_delay(30)
}

fn default_device_management_cleanup() -> SystemCleanupSettings {
    SystemCleanupSettings::with_delay(15)
}

fn default_provisioning_cleanup() -> SystemCleanupSettings {
    SystemCleanupSettings::with_delay(60)
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            directory: default_directory_cleanup(),
            device_management: default_device_management_cleanup(),
            provisioning: default_provisioning_cleanup(),
        }
    }
}

/// Cleanup settings for one remote system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemCleanupSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Wait after a pass that removed at least one record
    #[serde(default)]
    pub propagation_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

impl SystemCleanupSettings {
    pub fn with_delay(propagation_delay_secs: u64) -> Self {
        Self {
            enabled: true,
            propagation_delay_secs,
        }
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }

    fn validate(&self, system: &str) -> Result<(), EnrollError> {
        if self.propagation_delay_secs > MAX_PROPAGATION_DELAY_SECS {
            return Err(EnrollError::ConfigError(format!(
                "cleanup.{}.propagation_delay_secs must be within [0, {}], got {}",
                system, MAX_PROPAGATION_DELAY_SECS, self.propagation_delay_secs
            )));
        }
        Ok(())
    }
}

/// Computer naming convention
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamingSettings {
    /// e.g. `WAU{serial}` or `WAU{serial:4}`
    #[serde(default)]
    pub computer_name_template: Option<String>,
}

/// Checkpoint persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSettings {
    /// Checkpoint file, defaults to the storage layout's state file
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Checkpoints older than this are discarded
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u32,
}

fn default_max_age_hours() -> u32 {
    24
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            file: None,
            max_age_hours: default_max_age_hours(),
        }
    }
}

impl StateSettings {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.max_age_hours))
    }
}
