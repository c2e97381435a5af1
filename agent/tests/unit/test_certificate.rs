//! Certificate lifecycle tests

use std::sync::Arc;
use std::time::Duration;

use autoenroll::authn::certificate::CertificateValidator;
use autoenroll::errors::{CertificateError, EnrollError, ErrorKind};
use autoenroll::retry::{RetryExecutor, RetryPatterns, RetryPolicy};
use autoenroll::testing::{ManualClock, RecordingSleeper, StaticBundleDecoder, StaticSecretStore};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use tokio_test::{assert_err, assert_ok};

const VAULT: &str = "kv-enroll";
const CERT: &str = "enroll-cert";
const PASSWORD: &str = "enroll-cert-password";

fn now() -> DateTime<Utc> {
    "2026-03-01T08:00:00Z".parse().unwrap()
}

fn secret_store() -> StaticSecretStore {
    StaticSecretStore::new()
        .with_secret(VAULT, CERT, STANDARD.encode(b"pfx-bytes"))
        .with_secret(VAULT, PASSWORD, "s3cret")
}

fn validator_for(
    not_after: DateTime<Utc>,
    secrets: Arc<StaticSecretStore>,
    sleeper: Arc<RecordingSleeper>,
) -> CertificateValidator {
    let decoder = StaticBundleDecoder::new(
        b"pfx-bytes",
        "s3cret",
        "CN=WAU-Enrollment",
        now() - chrono::Duration::days(365),
        not_after,
    );
    let retry = RetryExecutor::new(
        RetryPolicy::new(3, 100, 2.0).unwrap(),
        RetryPatterns::default(),
        sleeper,
    );
    CertificateValidator::new(
        secrets,
        Arc::new(decoder),
        retry,
        Arc::new(ManualClock::new(now())),
    )
}

fn validator(not_after: DateTime<Utc>) -> CertificateValidator {
    validator_for(
        not_after,
        Arc::new(secret_store()),
        Arc::new(RecordingSleeper::new()),
    )
}

#[tokio::test]
async fn test_thirty_days_left_warns() {
    let credential = assert_ok!(
        validator(now() + chrono::Duration::days(30))
            .retrieve(VAULT, CERT, PASSWORD)
            .await
    );

    assert_eq!(credential.expiry_warning(), Some(30));
    assert_eq!(credential.days_until_expiry(now()), 30);
}

#[tokio::test]
async fn test_thirty_one_days_left_is_silent() {
    let credential = assert_ok!(
        validator(now() + chrono::Duration::days(31))
            .retrieve(VAULT, CERT, PASSWORD)
            .await
    );

    assert_eq!(credential.expiry_warning(), None);
    assert!(credential.has_private_key());
}

#[tokio::test]
async fn test_expired_one_second_ago() {
    let not_after = now() - chrono::Duration::seconds(1);
    let err = assert_err!(validator(not_after).retrieve(VAULT, CERT, PASSWORD).await);

    assert_eq!(
        err.certificate_error(),
        Some(&CertificateError::Expired { not_after })
    );
    assert_eq!(err.kind(), ErrorKind::Certificate);
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_expires_exactly_now_is_still_valid() {
    let credential = assert_ok!(validator(now()).retrieve(VAULT, CERT, PASSWORD).await);
    assert_eq!(credential.expiry_warning(), Some(0));
}

#[tokio::test]
async fn test_transient_secret_store_failure_is_retried() {
    let secrets = Arc::new(secret_store());
    secrets.fail_next(EnrollError::Remote("The operation has timed out".to_string()));
    let sleeper = Arc::new(RecordingSleeper::new());

    let validator = validator_for(
        now() + chrono::Duration::days(200),
        secrets.clone(),
        sleeper.clone(),
    );
    assert_ok!(validator.retrieve(VAULT, CERT, PASSWORD).await);

    assert_eq!(secrets.calls(), 3);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(100)]);
}

#[tokio::test]
async fn test_forbidden_secret_store_fails_fast() {
    let secrets = Arc::new(secret_store());
    secrets.fail_next(EnrollError::AuthError("Forbidden: caller lacks get permission".to_string()));

    let validator = validator_for(
        now() + chrono::Duration::days(200),
        secrets.clone(),
        Arc::new(RecordingSleeper::new()),
    );
    let err = assert_err!(validator.retrieve(VAULT, CERT, PASSWORD).await);

    assert_eq!(secrets.calls(), 1);
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(err.attempts(), Some(1));
}
