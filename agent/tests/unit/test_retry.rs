//! Retry executor tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autoenroll::errors::{EnrollError, ErrorKind};
use autoenroll::retry::{RetryExecutor, RetryPatterns, RetryPolicy};
use autoenroll::testing::RecordingSleeper;
use tokio_test::{assert_err, assert_ok};

fn executor(policy: RetryPolicy) -> (RetryExecutor, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::new());
    let executor = RetryExecutor::new(policy, RetryPatterns::default(), sleeper.clone());
    (executor, sleeper)
}

#[tokio::test]
async fn test_throttled_operation_succeeds_on_third_attempt() {
    let (executor, sleeper) = executor(RetryPolicy::new(3, 100, 2.0).unwrap());
    let counter = AtomicU32::new(0);
    let calls = &counter;

    let result = executor
        .execute("list devices", move || async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 3 {
                Err(EnrollError::Remote("HTTP 429".to_string()))
            } else {
                Ok("devices")
            }
        })
        .await;

    assert_eq!(assert_ok!(result), "devices");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        sleeper.sleeps(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test]
async fn test_permanent_failure_attempted_once() {
    let (executor, sleeper) = executor(RetryPolicy::new(10, 100, 2.0).unwrap());
    let counter = AtomicU32::new(0);
    let calls = &counter;

    let result: Result<(), _> = executor
        .execute("get secret", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EnrollError::Remote("permission denied".to_string()))
        })
        .await;

    let err = assert_err!(result);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(sleeper.sleeps().is_empty());
    match err {
        EnrollError::RetryExhausted {
            attempts,
            retryable,
            ..
        } => {
            assert_eq!(attempts, 1);
            assert!(!retryable);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_exhaustion_reports_attempts_and_classification() {
    let (executor, sleeper) = executor(RetryPolicy::new(4, 500, 3.0).unwrap());
    let counter = AtomicU32::new(0);
    let calls = &counter;

    let result: Result<(), _> = executor
        .execute("remove device", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EnrollError::Remote("503 Service Unavailable".to_string()))
        })
        .await;

    let err = assert_err!(result);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(err.attempts(), Some(4));
    assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    assert!(err.is_fatal());
    assert!(err.to_string().contains("remove device failed after 4 attempt(s)"));
    assert_eq!(
        sleeper.sleeps(),
        vec![
            Duration::from_millis(500),
            Duration::from_millis(1500),
            Duration::from_millis(4500)
        ]
    );
}

#[tokio::test]
async fn test_single_attempt_policy_never_sleeps() {
    let (executor, sleeper) = executor(RetryPolicy::new(1, 100, 2.0).unwrap());

    let result: Result<(), _> = executor
        .execute("query", move || async move {
            Err(EnrollError::TransientNetwork("connection reset".to_string()))
        })
        .await;

    assert_eq!(assert_err!(result).attempts(), Some(1));
    assert!(sleeper.sleeps().is_empty());
}

#[tokio::test]
async fn test_delay_ceiling_applied() {
    let policy = RetryPolicy::new(5, 1000, 5.0)
        .unwrap()
        .with_max_delay(Duration::from_secs(10));
    let (executor, sleeper) = executor(policy);

    let result: Result<(), _> = executor
        .execute("query", move || async move {
            Err(EnrollError::Remote("gateway timeout".to_string()))
        })
        .await;

    assert_err!(result);
    assert_eq!(
        sleeper.sleeps(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(10)
        ]
    );
}

#[tokio::test]
async fn test_configured_patterns_replace_defaults() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let executor = RetryExecutor::new(
        RetryPolicy::new(3, 100, 1.0).unwrap(),
        RetryPatterns::from_config(&["maintenance".to_string()]),
        sleeper.clone(),
    );
    let counter = AtomicU32::new(0);
    let calls = &counter;

    let result: Result<(), _> = executor
        .execute("query", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EnrollError::Remote("HTTP 429".to_string()))
        })
        .await;

    assert_err!(result);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let result: Result<(), _> = executor
        .execute("query", move || async move {
            Err(EnrollError::Remote("Service in MAINTENANCE".to_string()))
        })
        .await;

    assert_eq!(assert_err!(result).attempts(), Some(3));
    assert_eq!(
        sleeper.sleeps(),
        vec![Duration::from_millis(100), Duration::from_millis(100)]
    );
}
