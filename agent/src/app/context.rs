//! Deployment context shared by every workflow component

use std::sync::Arc;

use crate::app::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::authn::certificate::{BundleDecoder, CertificateValidator};
use crate::authn::secrets::SecretStore;
use crate::deploy::cleanup::{CleanupCoordinator, RemoteServices};
use crate::deploy::fsm::DeploymentStateMachine;
use crate::device::identity::DeviceIdentity;
use crate::filesys::file::File;
use crate::retry::RetryExecutor;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::storage::store::{FileStore, StateStore, STATE_KEY};

/// Settings, device identity, time sources and the checkpoint store.
///
/// Built once at startup and passed to every component.
#[derive(Clone)]
pub struct DeploymentContext {
    pub settings: Arc<Settings>,
    pub identity: DeviceIdentity,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
    pub store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for DeploymentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentContext")
            .field("settings", &self.settings)
            .field("identity", &self.identity)
            .finish()
    }
}

impl DeploymentContext {
    /// Context on the system clock and tokio timer
    pub fn new(settings: Settings, identity: DeviceIdentity, store: Arc<dyn StateStore>) -> Self {
        Self {
            settings: Arc::new(settings),
            identity,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            store,
        }
    }

    /// Context persisting the checkpoint under `layout`
    pub fn with_layout(
        settings: Settings,
        identity: DeviceIdentity,
        layout: &StorageLayout,
    ) -> Self {
        let store = state_store(layout, &settings);
        Self::new(settings, identity, Arc::new(store))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Executor configured from the retry settings
    pub fn retry_executor(&self) -> RetryExecutor {
        RetryExecutor::new(
            self.settings.retry.policy,
            self.settings.retry_patterns(),
            self.sleeper.clone(),
        )
    }

    /// Load the checkpoint for this device
    pub async fn load_state(&self) -> DeploymentStateMachine {
        DeploymentStateMachine::load(
            self.store.clone(),
            self.clock.clone(),
            self.identity.serial().unwrap_or_default(),
            self.settings.state.max_age(),
        )
        .await
    }

    pub fn certificate_validator(
        &self,
        secrets: Arc<dyn SecretStore>,
        decoder: Arc<dyn BundleDecoder>,
    ) -> CertificateValidator {
        CertificateValidator::new(secrets, decoder, self.retry_executor(), self.clock.clone())
            .with_expiry_warning_days(self.settings.key_vault.expiry_warning_days)
    }

    pub fn cleanup_coordinator(&self, services: RemoteServices) -> CleanupCoordinator {
        CleanupCoordinator::new(
            services,
            self.retry_executor(),
            self.sleeper.clone(),
            self.clock.clone(),
            self.settings.cleanup.clone(),
            self.identity.clone(),
        )
        .with_name_template(self.settings.naming.computer_name_template.clone())
    }
}

/// File store for the checkpoint, honouring `state.file` when set
pub fn state_store(layout: &StorageLayout, settings: &Settings) -> FileStore {
    let file = match &settings.state.file {
        Some(path) => File::new(path),
        None => layout.state_file(),
    };
    FileStore::new(&layout.base_dir).with_file(STATE_KEY, file)
}
