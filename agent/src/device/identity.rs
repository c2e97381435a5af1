//! Device identity keys used to correlate this machine with remote records

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::EnrollError;

/// Environment override for the hardware serial number
pub const SERIAL_ENV_VAR: &str = "AUTOENROLL_SERIAL";

/// Environment override for the computer name
pub const COMPUTER_NAME_ENV_VAR: &str = "AUTOENROLL_COMPUTER_NAME";

/// NetBIOS limit on computer names
pub const MAX_COMPUTER_NAME_LEN: usize = 15;

#[cfg(target_os = "linux")]
const DMI_SERIAL_PATH: &str = "/sys/class/dmi/id/product_serial";

/// Firmware placeholder values that do not identify a device
const PLACEHOLDER_VALUES: &[&str] = &[
    "unknown",
    "to be filled by o.e.m.",
    "default string",
    "system serial number",
    "none",
    "0",
];

/// Hardware serial (primary key) and computer name (secondary key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub serial_number: String,
    pub computer_name: String,
}

impl DeviceIdentity {
    pub fn new(serial_number: impl Into<String>, computer_name: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into().trim().to_string(),
            computer_name: computer_name.into().trim().to_string(),
        }
    }

    /// Detect the identity of the running machine
    pub fn detect() -> Self {
        let serial_number = std::env::var(SERIAL_ENV_VAR)
            .ok()
            .or_else(read_platform_serial)
            .unwrap_or_default();

        let computer_name = std::env::var(COMPUTER_NAME_ENV_VAR)
            .ok()
            .or_else(sysinfo::System::host_name)
            .unwrap_or_default();

        let identity = Self::new(serial_number, computer_name);
        if identity.serial().is_none() {
            warn!("Unable to determine the device serial number");
        }
        debug!(
            serial = %identity.serial_number,
            computer_name = %identity.computer_name,
            "Detected device identity"
        );
        identity
    }

    /// The serial number, unless empty or a firmware placeholder
    pub fn serial(&self) -> Option<&str> {
        known(&self.serial_number)
    }

    /// The computer name, unless empty or a placeholder
    pub fn computer_name(&self) -> Option<&str> {
        known(&self.computer_name)
    }

    /// Keys for systems indexed by hardware serial only
    pub fn serial_keys(&self) -> Vec<String> {
        self.serial().map(|s| vec![s.to_string()]).unwrap_or_default()
    }

    /// Keys for the directory: serial, computer name and the naming convention
    pub fn directory_keys(&self, template: Option<&str>) -> Result<Vec<String>, EnrollError> {
        let mut keys: Vec<String> = Vec::new();
        let mut push = |key: &str| {
            if !keys.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                keys.push(key.to_string());
            }
        };

        if let Some(serial) = self.serial() {
            push(serial);
        }
        if let Some(name) = self.computer_name() {
            push(name);
        }
        if let (Some(template), Some(serial)) = (template, self.serial()) {
            let expanded = expand_name_template(template, serial)?;
            if known(&expanded).is_some() {
                push(&expanded);
            }
        }

        Ok(keys)
    }
}

fn known(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || PLACEHOLDER_VALUES
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
    {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(target_os = "linux")]
fn read_platform_serial() -> Option<String> {
    std::fs::read_to_string(DMI_SERIAL_PATH)
        .ok()
        .map(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
}

#[cfg(not(target_os = "linux"))]
fn read_platform_serial() -> Option<String> {
    None
}

/// Expand a computer naming convention such as `WAU{serial}` or `WAU{serial:4}`.
///
/// `{serial}` inserts the whole serial, `{serial:N}` its last N characters.
/// The result is truncated to the NetBIOS limit.
pub fn expand_name_template(template: &str, serial: &str) -> Result<String, EnrollError> {
    let mut out = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }

        let mut token = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            token.push(c);
        }
        if !closed {
            return Err(EnrollError::ConfigError(format!(
                "unterminated token in naming template '{}'",
                template
            )));
        }

        match token.split_once(':') {
            None if token == "serial" => out.push_str(serial),
            Some(("serial", count)) => {
                let count: usize = count.parse().ok().filter(|n| *n > 0).ok_or_else(|| {
                    EnrollError::ConfigError(format!(
                        "invalid serial length '{}' in naming template '{}'",
                        count, template
                    ))
                })?;
                let skip = serial.chars().count().saturating_sub(count);
                out.extend(serial.chars().skip(skip));
            }
            _ => {
                return Err(EnrollError::ConfigError(format!(
                    "unknown token '{{{}}}' in naming template '{}'",
                    token, template
                )))
            }
        }
    }

    Ok(out.chars().take(MAX_COMPUTER_NAME_LEN).collect())
}
