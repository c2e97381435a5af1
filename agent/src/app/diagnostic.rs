//! Diagnostic report for troubleshooting a device

use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::app::context::state_store;
use crate::deploy::fsm::{read_checkpoint, StatusReport};
use crate::device::identity::DeviceIdentity;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::storage::store::STATE_KEY;
use crate::utils::{version_info, VersionInfo};

/// Host, identity and checkpoint information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub version: VersionInfo,
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub hostname: String,
    pub uptime_secs: u64,
    pub identity: DeviceIdentity,
    pub serial_known: bool,
    pub directory_keys: Vec<String>,
    pub settings_file: String,
    pub settings_error: Option<String>,
    pub state_file: String,
    pub checkpoint: Option<StatusReport>,
    pub checkpoint_error: Option<String>,
}

/// Collect a report without touching any remote system
pub async fn collect(layout: &StorageLayout, identity: DeviceIdentity) -> DiagnosticReport {
    let settings_file = layout.settings_file();
    let (settings, settings_error) = match Settings::load(&settings_file).await {
        Ok(settings) => (settings, None),
        Err(e) => (Settings::default(), Some(e.to_string())),
    };

    let directory_keys = identity
        .directory_keys(settings.naming.computer_name_template.as_deref())
        .unwrap_or_default();

    let store = state_store(layout, &settings);
    let state_file = store.file_for(STATE_KEY);
    let (checkpoint, checkpoint_error) = match read_checkpoint(&store).await {
        Ok(state) => (state.as_ref().map(StatusReport::from_state), None),
        Err(e) => (None, Some(e.to_string())),
    };

    DiagnosticReport {
        version: version_info(),
        os_name: System::name().unwrap_or_else(|| "unknown".to_string()),
        os_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
        kernel_version: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        uptime_secs: System::uptime(),
        serial_known: identity.serial().is_some(),
        identity,
        directory_keys,
        settings_file: settings_file.path().display().to_string(),
        settings_error,
        state_file: state_file.path().display().to_string(),
        checkpoint,
        checkpoint_error,
    }
}
