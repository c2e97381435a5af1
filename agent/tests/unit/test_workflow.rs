//! End-to-end workflow tests

use std::sync::Arc;
use std::time::Duration;

use autoenroll::app::context::DeploymentContext;
use autoenroll::app::run::Workflow;
use autoenroll::deploy::cleanup::RemoteServices;
use autoenroll::deploy::fsm::DeploymentStateMachine;
use autoenroll::deploy::phase::DeploymentPhase;
use autoenroll::device::DeviceIdentity;
use autoenroll::errors::ErrorKind;
use autoenroll::services::RemoteRecord;
use autoenroll::storage::settings::Settings;
use autoenroll::storage::store::StateStore;
use autoenroll::testing::{
    InMemoryRecordService, ManualClock, MemoryStore, RecordingSleeper, ScriptedPhaseRunner,
    StaticBundleDecoder, StaticSecretStore,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use tokio_test::assert_ok;

const SETTINGS: &str = r#"{
    "retry": {"max_attempts": 3, "initial_delay_ms": 100, "backoff_multiplier": 2.0},
    "key_vault": {
        "vault_name": "kv-enroll",
        "certificate_secret": "enroll-cert",
        "password_secret": "enroll-cert-password"
    },
    "cleanup": {
        "directory": {"propagation_delay_secs": 45},
        "device_management": {"enabled": false}
    },
    "naming": {"computer_name_template": "WAU{serial:4}"}
}"#;

fn start() -> DateTime<Utc> {
    "2026-03-01T08:00:00Z".parse().unwrap()
}

struct Device {
    store: Arc<dyn StateStore>,
    clock: Arc<ManualClock>,
    sleeper: Arc<RecordingSleeper>,
    runner: Arc<ScriptedPhaseRunner>,
    directory: Arc<InMemoryRecordService>,
    device_management: Arc<InMemoryRecordService>,
    provisioning: Arc<InMemoryRecordService>,
}

impl Device {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        Self {
            store: Arc::new(MemoryStore::new()),
            sleeper: Arc::new(RecordingSleeper::with_clock(clock.clone())),
            clock,
            runner: Arc::new(ScriptedPhaseRunner::new()),
            directory: Arc::new(InMemoryRecordService::lagging()),
            device_management: Arc::new(InMemoryRecordService::new()),
            provisioning: Arc::new(InMemoryRecordService::new()),
        }
    }

    fn workflow(&self) -> Workflow {
        let settings = Settings::from_json(SETTINGS).unwrap();
        let context = DeploymentContext::new(
            settings,
            DeviceIdentity::new("TEST123", "WAU1234"),
            self.store.clone(),
        )
        .with_clock(self.clock.clone())
        .with_sleeper(self.sleeper.clone());

        let secrets = StaticSecretStore::new()
            .with_secret("kv-enroll", "enroll-cert", STANDARD.encode(b"pfx"))
            .with_secret("kv-enroll", "enroll-cert-password", "s3cret");
        let decoder = StaticBundleDecoder::new(
            b"pfx",
            "s3cret",
            "CN=WAU-Enrollment",
            start() - chrono::Duration::days(30),
            start() + chrono::Duration::days(365),
        );
        let services = RemoteServices {
            directory: self.directory.clone(),
            device_management: self.device_management.clone(),
            provisioning: self.provisioning.clone(),
        };

        Workflow::new(
            context,
            self.runner.clone(),
            Arc::new(secrets),
            Arc::new(decoder),
            services,
        )
    }

    async fn state(&self) -> DeploymentStateMachine {
        DeploymentStateMachine::load(
            self.store.clone(),
            self.clock.clone(),
            "TEST123",
            chrono::Duration::hours(24),
        )
        .await
    }
}

#[tokio::test]
async fn test_fresh_run_then_resume() {
    let device = Device::new();
    device
        .directory
        .insert("WAU1234", RemoteRecord::new("entra-1", "WAU1234"));
    device
        .device_management
        .insert("TEST123", RemoteRecord::new("mdm-1", "WAU1234"));

    let summary = assert_ok!(device.workflow().run().await);

    assert!(!summary.resumed);
    assert_eq!(summary.executed, DeploymentPhase::sequence().to_vec());
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.cleanup.directory, 1);
    assert_eq!(summary.cleanup.device_management, 0);
    assert_eq!(device.directory.removed_ids(), vec!["entra-1"]);
    assert!(device.device_management.remove_attempts().is_empty());
    assert_eq!(device.sleeper.sleeps(), vec![Duration::from_secs(45)]);
    assert_eq!(device.runner.connections().len(), 1);

    let sm = device.state().await;
    assert!(sm.is_resume());
    assert_eq!(sm.current_phase(), DeploymentPhase::Completed);
    assert!(sm.was_device_cleaned("entra-1"));
    let key_vault = sm.phase_result(DeploymentPhase::KeyVaultAccess).unwrap();
    assert_eq!(
        key_vault.result.data.as_ref().unwrap()["subject"],
        "CN=WAU-Enrollment"
    );
    let identity = sm.phase_result(DeploymentPhase::DeviceCleanup).unwrap();
    assert_eq!(
        identity.result.data.as_ref().unwrap()["directoryKeys"],
        serde_json::json!(["TEST123", "WAU1234", "WAUT123"])
    );

    // A second invocation inside the freshness window skips everything
    device.clock.advance(chrono::Duration::hours(1));
    let calls_before = device.runner.calls().len();
    let summary = assert_ok!(device.workflow().run().await);

    assert!(summary.resumed);
    assert!(summary.executed.is_empty());
    assert_eq!(summary.skipped, DeploymentPhase::sequence().to_vec());
    assert_eq!(device.runner.calls().len(), calls_before);
    assert_eq!(device.directory.remove_attempts(), vec!["entra-1"]);
}

#[tokio::test]
async fn test_failed_phase_is_rerun_on_resume() {
    let device = Device::new();
    device
        .directory
        .insert("TEST123", RemoteRecord::new("entra-1", "WAU1234"));
    device
        .runner
        .fail_phase(DeploymentPhase::GroupValidation, "group 'Autopilot-Devices' not found");

    let err = device.workflow().run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Phase);

    let sm = device.state().await;
    assert_eq!(sm.state().current_phase, DeploymentPhase::Failed);
    assert!(sm
        .state()
        .last_error
        .as_deref()
        .unwrap()
        .contains("Autopilot-Devices"));
    let failed = sm.phase_result(DeploymentPhase::GroupValidation).unwrap();
    assert!(!failed.result.success);

    device.runner.clear_failures();
    device.clock.advance(chrono::Duration::minutes(30));
    let summary = assert_ok!(device.workflow().run().await);

    assert!(summary.resumed);
    assert_eq!(
        summary.executed,
        vec![
            DeploymentPhase::GroupValidation,
            DeploymentPhase::DeviceRegistration,
            DeploymentPhase::OobeLaunch,
        ]
    );
    assert_eq!(summary.skipped.len(), 9);
    assert_eq!(device.directory.remove_attempts(), vec!["entra-1"]);

    let sm = device.state().await;
    assert_eq!(sm.current_phase(), DeploymentPhase::Completed);
    assert!(sm.state().last_error.is_none());
    assert!(sm.phase_result(DeploymentPhase::GroupValidation).unwrap().result.success);
}

#[tokio::test]
async fn test_stale_checkpoint_restarts_from_the_beginning() {
    let device = Device::new();
    device
        .runner
        .fail_phase(DeploymentPhase::DeviceRegistration, "registration window closed");
    assert!(device.workflow().run().await.is_err());

    device.runner.clear_failures();
    device.clock.advance(chrono::Duration::hours(25));
    let summary = assert_ok!(device.workflow().run().await);

    assert!(!summary.resumed);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.executed.len(), DeploymentPhase::sequence().len());
}

#[tokio::test]
async fn test_expired_certificate_halts_before_cleanup() {
    let device = Device::new();
    device
        .directory
        .insert("TEST123", RemoteRecord::new("entra-1", "WAU1234"));
    device.clock.advance(chrono::Duration::days(366));

    let err = device.workflow().run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Certificate);
    assert_eq!(device.directory.query_count(), 0);
    let sm = device.state().await;
    assert_eq!(sm.state().current_phase, DeploymentPhase::Failed);
    assert!(sm.should_skip(DeploymentPhase::AzureAuthentication));
    assert!(!sm.should_skip(DeploymentPhase::KeyVaultAccess));
}
