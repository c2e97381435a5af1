//! Cleanup coordinator tests

use std::sync::Arc;
use std::time::Duration;

use autoenroll::app::clock::Clock;
use autoenroll::deploy::cleanup::{CleanupCoordinator, RemoteServices};
use autoenroll::deploy::fsm::DeploymentStateMachine;
use autoenroll::device::DeviceIdentity;
use autoenroll::errors::EnrollError;
use autoenroll::retry::{RetryExecutor, RetryPatterns, RetryPolicy};
use autoenroll::services::RemoteRecord;
use autoenroll::storage::settings::CleanupSettings;
use autoenroll::storage::store::StateStore;
use autoenroll::testing::{InMemoryRecordService, ManualClock, MemoryStore, RecordingSleeper};
use tokio_test::assert_ok;

struct Harness {
    directory: Arc<InMemoryRecordService>,
    device_management: Arc<InMemoryRecordService>,
    provisioning: Arc<InMemoryRecordService>,
    sleeper: Arc<RecordingSleeper>,
    clock: Arc<ManualClock>,
    store: Arc<dyn StateStore>,
}

impl Harness {
    fn new(directory: InMemoryRecordService) -> Self {
        Self {
            directory: Arc::new(directory),
            device_management: Arc::new(InMemoryRecordService::new()),
            provisioning: Arc::new(InMemoryRecordService::new()),
            sleeper: Arc::new(RecordingSleeper::new()),
            clock: Arc::new(ManualClock::new("2026-03-01T08:00:00Z".parse().unwrap())),
            store: Arc::new(MemoryStore::new()),
        }
    }

    fn coordinator(&self) -> CleanupCoordinator {
        let services = RemoteServices {
            directory: self.directory.clone(),
            device_management: self.device_management.clone(),
            provisioning: self.provisioning.clone(),
        };
        let retry = RetryExecutor::new(
            RetryPolicy::new(3, 100, 2.0).unwrap(),
            RetryPatterns::default(),
            self.sleeper.clone(),
        );
        CleanupCoordinator::new(
            services,
            retry,
            self.sleeper.clone(),
            self.clock.clone(),
            CleanupSettings::default(),
            DeviceIdentity::new("TEST123", "WAU1234"),
        )
        .with_name_template(Some("WAU{serial}".to_string()))
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
async fn test_second_pass_removes_nothing() {
    let h = Harness::new(InMemoryRecordService::lagging());
    h.directory.insert("WAU1234", RemoteRecord::new("dev-1", "WAU1234"));
    h.directory.insert("WAU1234", RemoteRecord::new("dev-2", "WAU1234"));
    let mut sm = h.state().await;

    let first = assert_ok!(h.coordinator().cleanup_directory_records(&mut sm).await);
    let second = assert_ok!(h.coordinator().cleanup_directory_records(&mut sm).await);

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(h.directory.remove_attempts(), vec!["dev-1", "dev-2"]);
    assert_eq!(h.sleeper.sleeps(), vec![Duration::from_secs(30)]);
}

#[tokio::test]
async fn test_resumed_session_does_not_remove_twice() {
    let h = Harness::new(InMemoryRecordService::lagging());
    h.directory.insert("TEST123", RemoteRecord::new("dev-1", "WAU1234"));
    {
        let mut sm = h.state().await;
        assert_ok!(h.coordinator().cleanup_directory_records(&mut sm).await);
    }

    h.clock.advance(chrono::Duration::minutes(5));
    let mut sm = h.state().await;
    assert!(sm.is_resume());
    let removed = assert_ok!(h.coordinator().cleanup_directory_records(&mut sm).await);

    assert_eq!(removed, 0);
    assert_eq!(h.directory.remove_attempts(), vec!["dev-1"]);
}

#[tokio::test]
async fn test_failed_removal_does_not_abort_pass() {
    let h = Harness::new(InMemoryRecordService::new());
    h.directory.insert("TEST123", RemoteRecord::new("dev-1", "WAU1234"));
    h.directory.insert("TEST123", RemoteRecord::new("dev-2", "WAU1234-old"));
    h.directory.fail_remove("dev-2", "Insufficient privileges to complete the operation");
    let mut sm = h.state().await;

    let removed = assert_ok!(h.coordinator().cleanup_directory_records(&mut sm).await);

    assert_eq!(removed, 1);
    assert!(sm.was_device_cleaned("dev-1"));
    assert!(!sm.was_device_cleaned("dev-2"));
    assert_eq!(h.directory.remove_attempts(), vec!["dev-1", "dev-2"]);
    assert_eq!(h.sleeper.sleeps(), vec![Duration::from_secs(30)]);
}

#[tokio::test]
async fn test_transient_removal_failure_is_retried() {
    let h = Harness::new(InMemoryRecordService::new());
    h.device_management
        .insert("TEST123", RemoteRecord::new("mdm-1", "WAU1234").with_serial("TEST123"));
    h.device_management.throttle_queries(2);
    let mut sm = h.state().await;

    let removed = assert_ok!(h.coordinator().cleanup_managed_device_records(&mut sm).await);

    assert_eq!(removed, 1);
    assert_eq!(h.device_management.query_count(), 3);
    assert_eq!(
        h.sleeper.sleeps(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_secs(15)
        ]
    );
}

#[tokio::test]
async fn test_provisioning_queries_serial_only() {
    let h = Harness::new(InMemoryRecordService::new());
    h.provisioning
        .insert("WAU1234", RemoteRecord::new("ap-name", "WAU1234"));
    h.provisioning
        .insert("TEST123", RemoteRecord::new("ap-serial", "").with_serial("TEST123"));
    let mut sm = h.state().await;

    let mut coordinator = h.coordinator();
    let removed = assert_ok!(coordinator.cleanup_provisioning_records(&mut sm).await);

    assert_eq!(removed, 1);
    assert_eq!(h.provisioning.removed_ids(), vec!["ap-serial"]);
    assert_eq!(h.provisioning.query_count(), 1);
    assert_eq!(h.sleeper.sleeps(), vec![Duration::from_secs(60)]);

    let summary = coordinator.summary();
    assert_eq!(summary.provisioning, 1);
    assert_eq!(summary.records[0].system_name, "provisioning");
    assert_eq!(summary.records[0].removed_at, h.clock.now());
}

#[tokio::test]
async fn test_unreachable_system_is_fatal() {
    let h = Harness::new(InMemoryRecordService::new());
    h.directory.fail_queries("Connection refused");
    let mut sm = h.state().await;

    let err = h
        .coordinator()
        .cleanup_directory_records(&mut sm)
        .await
        .unwrap_err();

    match &err {
        EnrollError::CleanupQueryError { system, message } => {
            assert_eq!(system, "directory");
            assert!(message.contains("Connection refused"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_fatal());
    assert!(h.directory.remove_attempts().is_empty());
}
