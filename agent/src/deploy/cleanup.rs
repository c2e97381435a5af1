//! Removal of stale device records from the remote systems
//!
//! Each pass resolves the device's identity keys, queries the system for
//! matching records and removes the ones this session has not removed yet.
//! Removal is best-effort per record; only a system that cannot be queried
//! at all fails the pass.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::clock::{Clock, Sleeper};
use crate::deploy::fsm::DeploymentStateMachine;
use crate::device::identity::DeviceIdentity;
use crate::errors::EnrollError;
use crate::retry::RetryExecutor;
use crate::services::{DeviceRecordService, RemoteRecord, RemoteSystem};
use crate::storage::settings::{CleanupSettings, SystemCleanupSettings};

/// One removed remote record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRecord {
    pub system_name: String,
    pub remote_id: String,
    pub display_name: String,
    pub removed_at: DateTime<Utc>,
}

/// Removal counts per system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub directory: usize,
    pub device_management: usize,
    pub provisioning: usize,
    pub records: Vec<CleanupRecord>,
}

impl CleanupSummary {
    pub fn total(&self) -> usize {
        self.directory + self.device_management + self.provisioning
    }

    fn add(&mut self, system: RemoteSystem, removed: usize) {
        match system {
            RemoteSystem::Directory => self.directory += removed,
            RemoteSystem::DeviceManagement => self.device_management += removed,
            RemoteSystem::Provisioning => self.provisioning += removed,
        }
    }
}

/// Clients for the three remote systems
#[derive(Clone)]
pub struct RemoteServices {
    pub directory: Arc<dyn DeviceRecordService>,
    pub device_management: Arc<dyn DeviceRecordService>,
    pub provisioning: Arc<dyn DeviceRecordService>,
}

impl RemoteServices {
    pub fn get(&self, system: RemoteSystem) -> &Arc<dyn DeviceRecordService> {
        match system {
            RemoteSystem::Directory => &self.directory,
            RemoteSystem::DeviceManagement => &self.device_management,
            RemoteSystem::Provisioning => &self.provisioning,
        }
    }
}

/// Runs cleanup passes against the remote systems, one at a time
pub struct CleanupCoordinator {
    services: RemoteServices,
    retry: RetryExecutor,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    settings: CleanupSettings,
    identity: DeviceIdentity,
    name_template: Option<String>,
    summary: CleanupSummary,
}

impl CleanupCoordinator {
    pub fn new(
        services: RemoteServices,
        retry: RetryExecutor,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
        settings: CleanupSettings,
        identity: DeviceIdentity,
    ) -> Self {
        Self {
            services,
            retry,
            sleeper,
            clock,
            settings,
            identity,
            name_template: None,
            summary: CleanupSummary::default(),
        }
    }

    /// Also match directory records named after this convention
    pub fn with_name_template(mut self, template: Option<String>) -> Self {
        self.name_template = template;
        self
    }

    pub fn summary(&self) -> &CleanupSummary {
        &self.summary
    }

    pub async fn cleanup_directory_records(
        &mut self,
        sm: &mut DeploymentStateMachine,
    ) -> Result<usize, EnrollError> {
        self.cleanup_pass(RemoteSystem::Directory, sm).await
    }

    pub async fn cleanup_managed_device_records(
        &mut self,
        sm: &mut DeploymentStateMachine,
    ) -> Result<usize, EnrollError> {
        self.cleanup_pass(RemoteSystem::DeviceManagement, sm).await
    }

    pub async fn cleanup_provisioning_records(
        &mut self,
        sm: &mut DeploymentStateMachine,
    ) -> Result<usize, EnrollError> {
        self.cleanup_pass(RemoteSystem::Provisioning, sm).await
    }

    /// Identity keys used to query `system`
    pub fn identity_keys(&self, system: RemoteSystem) -> Result<Vec<String>, EnrollError> {
        match system {
            RemoteSystem::Directory => self
                .identity
                .directory_keys(self.name_template.as_deref()),
            RemoteSystem::DeviceManagement | RemoteSystem::Provisioning => {
                Ok(self.identity.serial_keys())
            }
        }
    }

    fn system_settings(&self, system: RemoteSystem) -> &SystemCleanupSettings {
        match system {
            RemoteSystem::Directory => &self.settings.directory,
            RemoteSystem::DeviceManagement => &self.settings.device_management,
            RemoteSystem::Provisioning => &self.settings.provisioning,
        }
    }

    /// Run one pass against `system` and return the number of removed records
    pub async fn cleanup_pass(
        &mut self,
        system: RemoteSystem,
        sm: &mut DeploymentStateMachine,
    ) -> Result<usize, EnrollError> {
        let settings = self.system_settings(system).clone();
        if !settings.enabled {
            info!(%system, "Cleanup disabled, skipping");
            return Ok(0);
        }

        let keys = self.identity_keys(system)?;
        if keys.is_empty() {
            warn!(%system, "No device identity key available, skipping cleanup");
            return Ok(0);
        }

        let candidates = self.find_candidates(system, &keys).await?;
        info!(%system, matches = candidates.len(), "Found device records");

        let mut removed = 0;
        for record in candidates {
            if sm.was_device_cleaned(&record.id) {
                debug!(%system, id = %record.id, "Record already removed in this session");
                continue;
            }

            if self.remove(system, &record).await {
                sm.record_cleaned_device(&record.id).await;
                self.summary.records.push(CleanupRecord {
                    system_name: system.to_string(),
                    remote_id: record.id.clone(),
                    display_name: record.display_name.clone(),
                    removed_at: self.clock.now(),
                });
                removed += 1;
            }
        }

        if removed > 0 {
            let delay = settings.propagation_delay();
            if !delay.is_zero() {
                info!(
                    %system,
                    removed,
                    delay_secs = delay.as_secs(),
                    "Waiting for removals to propagate"
                );
                self.sleeper.sleep(delay).await;
            }
        }

        self.summary.add(system, removed);
        info!(%system, removed, "Cleanup pass finished");
        Ok(removed)
    }

    /// Query every key, deduplicating by remote id.
    ///
    /// Fails only when every query failed.
    async fn find_candidates(
        &self,
        system: RemoteSystem,
        keys: &[String],
    ) -> Result<Vec<RemoteRecord>, EnrollError> {
        let service = self.services.get(system);
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0;

        for key in keys {
            let operation = format!("{} query '{}'", system, key);
            match self
                .retry
                .execute(&operation, || service.find_by_identity(key))
                .await
            {
                Ok(records) => {
                    succeeded += 1;
                    for record in records {
                        if seen.insert(record.id.clone()) {
                            candidates.push(record);
                        }
                    }
                }
                Err(e) => {
                    warn!(%system, key = %key, error = %e, "Device record query failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(EnrollError::CleanupQueryError {
                system: system.to_string(),
                message: e.to_string(),
            }),
            _ => Ok(candidates),
        }
    }

    /// Remove one record; failures are reported and swallowed
    async fn remove(&self, system: RemoteSystem, record: &RemoteRecord) -> bool {
        let service = self.services.get(system);
        let operation = format!("{} remove '{}'", system, record.id);

        match self.retry.execute(&operation, || service.remove(&record.id)).await {
            Ok(()) => {
                info!(
                    %system,
                    id = %record.id,
                    name = %record.display_name,
                    "Removed device record"
                );
                true
            }
            Err(e) => {
                let err = EnrollError::CleanupError {
                    system: system.to_string(),
                    message: format!("{} ({}): {}", record.display_name, record.id, e),
                };
                warn!("{}", err);
                false
            }
        }
    }
}
