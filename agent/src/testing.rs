//! In-memory collaborators for tests and dry runs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretSlice, SecretString};

use crate::app::clock::{Clock, Sleeper};
use crate::app::context::DeploymentContext;
use crate::app::run::PhaseRunner;
use crate::authn::certificate::{BundleDecoder, Credential, DecodedCertificate};
use crate::authn::secrets::SecretStore;
use crate::deploy::outcome::StepOutcome;
use crate::deploy::phase::DeploymentPhase;
use crate::errors::{CertificateError, EnrollError};
use crate::services::{DeviceRecordService, RemoteRecord};

pub use crate::storage::store::MemoryStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Records requested sleeps instead of waiting
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    clock: Option<Arc<ManualClock>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance `clock` by every recorded sleep
    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            clock: Some(clock),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }

    pub fn total(&self) -> Duration {
        lock(&self.sleeps).iter().sum()
    }

    pub fn clear(&self) {
        lock(&self.sleeps).clear();
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
        if let Some(clock) = &self.clock {
            if let Ok(by) = chrono::Duration::from_std(duration) {
                clock.advance(by);
            }
        }
    }
}

/// Secret store backed by a fixed map
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<(String, String), String>,
    failures: Mutex<Vec<EnrollError>>,
    calls: Mutex<usize>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(
        mut self,
        vault: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.secrets.insert((vault.into(), name.into()), value.into());
        self
    }

    /// Fail the next call with `err`; queued failures are used in order
    pub fn fail_next(&self, err: EnrollError) {
        lock(&self.failures).push(err);
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(
        &self,
        vault: &str,
        name: &str,
    ) -> Result<Option<SecretString>, EnrollError> {
        *lock(&self.calls) += 1;
        {
            let mut failures = lock(&self.failures);
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        Ok(self
            .secrets
            .get(&(vault.to_string(), name.to_string()))
            .map(|value| SecretString::from(value.clone())))
    }
}

/// Decoder accepting one bundle and password
#[derive(Debug, Clone)]
pub struct StaticBundleDecoder {
    bundle: Vec<u8>,
    password: String,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    has_private_key: bool,
}

impl StaticBundleDecoder {
    pub fn new(
        bundle: &[u8],
        password: &str,
        subject: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self {
            bundle: bundle.to_vec(),
            password: password.to_string(),
            subject: subject.to_string(),
            not_before,
            not_after,
            has_private_key: true,
        }
    }

    pub fn without_private_key(mut self) -> Self {
        self.has_private_key = false;
        self
    }
}

impl BundleDecoder for StaticBundleDecoder {
    fn decode(
        &self,
        bundle: &[u8],
        password: &SecretString,
    ) -> Result<DecodedCertificate, CertificateError> {
        if bundle != self.bundle.as_slice() {
            return Err(CertificateError::DecodeError("corrupt bundle".to_string()));
        }
        if password.expose_secret() != self.password {
            return Err(CertificateError::DecodeError(
                "the specified network password is not correct".to_string(),
            ));
        }

        let mut der = self.subject.as_bytes().to_vec();
        der.extend_from_slice(&self.not_after.timestamp().to_be_bytes());
        Ok(DecodedCertificate {
            subject: self.subject.clone(),
            not_before: self.not_before,
            not_after: self.not_after,
            der,
            private_key: self
                .has_private_key
                .then(|| SecretSlice::from(b"private-key".to_vec())),
        })
    }
}

/// Device record service held in memory.
///
/// Records are indexed by identity key; one record may sit under several
/// keys. With `lagging` set, removed records keep showing up in queries,
/// as they do in an eventually consistent directory.
#[derive(Debug, Default)]
pub struct InMemoryRecordService {
    records: Mutex<HashMap<String, Vec<RemoteRecord>>>,
    removed: Mutex<Vec<String>>,
    remove_attempts: Mutex<Vec<String>>,
    remove_failures: Mutex<HashMap<String, String>>,
    query_failure: Mutex<Option<String>>,
    transient_query_failures: Mutex<u32>,
    queries: Mutex<usize>,
    lagging: bool,
}

impl InMemoryRecordService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lagging() -> Self {
        Self {
            lagging: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, key: &str, record: RemoteRecord) {
        lock(&self.records)
            .entry(key.to_string())
            .or_default()
            .push(record);
    }

    /// Fail every removal of `id` with `message`
    pub fn fail_remove(&self, id: &str, message: &str) {
        lock(&self.remove_failures).insert(id.to_string(), message.to_string());
    }

    /// Fail every query with `message`
    pub fn fail_queries(&self, message: &str) {
        *lock(&self.query_failure) = Some(message.to_string());
    }

    /// Fail the next `count` queries with a throttling response
    pub fn throttle_queries(&self, count: u32) {
        *lock(&self.transient_query_failures) = count;
    }

    pub fn removed_ids(&self) -> Vec<String> {
        lock(&self.removed).clone()
    }

    pub fn remove_attempts(&self) -> Vec<String> {
        lock(&self.remove_attempts).clone()
    }

    pub fn query_count(&self) -> usize {
        *lock(&self.queries)
    }
}

#[async_trait]
impl DeviceRecordService for InMemoryRecordService {
    async fn find_by_identity(&self, key: &str) -> Result<Vec<RemoteRecord>, EnrollError> {
        *lock(&self.queries) += 1;

        {
            let mut throttled = lock(&self.transient_query_failures);
            if *throttled > 0 {
                *throttled -= 1;
                return Err(EnrollError::Remote("HTTP 429 Too Many Requests".to_string()));
            }
        }
        if let Some(message) = lock(&self.query_failure).clone() {
            return Err(EnrollError::Remote(message));
        }

        let removed = lock(&self.removed).clone();
        let records = lock(&self.records);
        Ok(records
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .flat_map(|(_, records)| records.iter())
            .filter(|record| self.lagging || !removed.contains(&record.id))
            .cloned()
            .collect())
    }

    async fn remove(&self, id: &str) -> Result<(), EnrollError> {
        lock(&self.remove_attempts).push(id.to_string());
        if let Some(message) = lock(&self.remove_failures).get(id) {
            return Err(EnrollError::Remote(message.clone()));
        }
        let mut removed = lock(&self.removed);
        if removed.iter().any(|r| r == id) {
            return Err(EnrollError::Remote(format!("Resource '{}' does not exist", id)));
        }
        removed.push(id.to_string());
        Ok(())
    }
}

/// Phase runner that succeeds unless told otherwise
#[derive(Debug, Default)]
pub struct ScriptedPhaseRunner {
    calls: Mutex<Vec<DeploymentPhase>>,
    failures: Mutex<HashMap<DeploymentPhase, String>>,
    connections: Mutex<Vec<String>>,
}

impl ScriptedPhaseRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `phase` with a non-retryable error until cleared
    pub fn fail_phase(&self, phase: DeploymentPhase, message: &str) {
        lock(&self.failures).insert(phase, message.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    pub fn calls(&self) -> Vec<DeploymentPhase> {
        lock(&self.calls).clone()
    }

    /// Thumbprints of the certificates used to connect
    pub fn connections(&self) -> Vec<String> {
        lock(&self.connections).clone()
    }
}

#[async_trait]
impl PhaseRunner for ScriptedPhaseRunner {
    async fn run_phase(
        &self,
        phase: DeploymentPhase,
        _context: &DeploymentContext,
    ) -> Result<StepOutcome, EnrollError> {
        lock(&self.calls).push(phase);
        if let Some(message) = lock(&self.failures).get(&phase) {
            return Err(EnrollError::PhaseFailed {
                phase: phase.to_string(),
                message: message.clone(),
            });
        }
        Ok(StepOutcome::success(phase, format!("{} done", phase)))
    }

    async fn connect_with_certificate(
        &self,
        credential: &Credential,
    ) -> Result<StepOutcome, EnrollError> {
        let phase = DeploymentPhase::GraphAuthentication;
        lock(&self.calls).push(phase);
        if let Some(message) = lock(&self.failures).get(&phase) {
            return Err(EnrollError::AuthError(message.clone()));
        }
        if !credential.has_private_key() {
            return Err(EnrollError::AuthError("certificate has no private key".to_string()));
        }
        lock(&self.connections).push(credential.thumbprint.clone());
        Ok(StepOutcome::success(
            phase,
            format!("Connected as {}", credential.subject),
        ))
    }
}
