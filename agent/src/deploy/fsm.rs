//! Checkpointed state machine for the enrollment workflow
//!
//! Every mutation is written through to the state store so that a process
//! restart resumes from the last reached phase. Only one process may drive a
//! given device's checkpoint at a time; concurrent invocations on the same
//! device are a precondition violation and are not detected.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::clock::Clock;
use crate::deploy::outcome::StepOutcome;
use crate::deploy::phase::DeploymentPhase;
use crate::deploy::state::{DeploymentState, PhaseRecord};
use crate::errors::EnrollError;
use crate::storage::store::{StateStore, STATE_KEY};

/// Default checkpoint freshness window
pub const DEFAULT_MAX_CHECKPOINT_AGE_HOURS: i64 = 24;

/// Deployment state machine
pub struct DeploymentStateMachine {
    state: DeploymentState,
    store: Arc<dyn StateStore>,
    key: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DeploymentStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentStateMachine")
            .field("state", &self.state)
            .field("key", &self.key)
            .finish()
    }
}

/// Why a persisted checkpoint was not resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Missing,
    Unreadable,
    ForeignDevice,
    UnknownDevice,
    Stale,
}

impl DeploymentStateMachine {
    /// Load the checkpoint for `device_serial`, falling back to a fresh state.
    ///
    /// A prior checkpoint is resumed only if it was written by the same
    /// device and its last checkpoint is younger than `max_age`. Read or
    /// parse failures never fail the load.
    pub async fn load(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        device_serial: &str,
        max_age: chrono::Duration,
    ) -> Self {
        let now = clock.now();
        let key = STATE_KEY.to_string();

        let (state, discarded) = match Self::read_prior(store.as_ref(), &key).await {
            Ok(Some(prior)) => match Self::check_prior(&prior, device_serial, now, max_age) {
                None => {
                    let mut prior = prior;
                    prior.is_resume = true;
                    (prior, None)
                }
                Some(reason) => (DeploymentState::new(device_serial, now), Some(reason)),
            },
            Ok(None) => (
                DeploymentState::new(device_serial, now),
                Some(DiscardReason::Missing),
            ),
            Err(e) => {
                warn!("Unable to read deployment state, starting fresh: {}", e);
                (
                    DeploymentState::new(device_serial, now),
                    Some(DiscardReason::Unreadable),
                )
            }
        };

        let machine = Self {
            state,
            store,
            key,
            clock,
        };

        match discarded {
            None => {
                info!(
                    session_id = %machine.state.session_id,
                    phase = %machine.state.current_phase,
                    resume_point = %machine.state.resume_point(),
                    "Resuming deployment from checkpoint"
                );
            }
            Some(reason) => {
                info!(
                    session_id = %machine.state.session_id,
                    ?reason,
                    "Starting fresh deployment"
                );
                machine.persist().await;
            }
        }

        machine
    }

    async fn read_prior(
        store: &dyn StateStore,
        key: &str,
    ) -> Result<Option<DeploymentState>, EnrollError> {
        match store.read(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn check_prior(
        prior: &DeploymentState,
        device_serial: &str,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> Option<DiscardReason> {
        if device_serial.trim().is_empty() {
            warn!("Device serial unknown, checkpoint cannot be matched to this device");
            return Some(DiscardReason::UnknownDevice);
        }
        if prior.device_serial != device_serial {
            info!(
                checkpoint_serial = %prior.device_serial,
                device_serial,
                "Checkpoint belongs to another device, discarding"
            );
            return Some(DiscardReason::ForeignDevice);
        }
        let age = now - prior.last_checkpoint;
        if age >= max_age {
            info!(
                age_hours = age.num_hours(),
                "Checkpoint is stale, discarding"
            );
            return Some(DiscardReason::Stale);
        }
        None
    }

    /// Write the whole state to the store, refreshing `last_checkpoint`.
    pub async fn save(&mut self) -> Result<(), EnrollError> {
        self.state.last_checkpoint = self.clock.now();
        self.write().await
    }

    async fn write(&self) -> Result<(), EnrollError> {
        let bytes = serde_json::to_vec_pretty(&self.state)?;
        self.store.write(&self.key, &bytes).await
    }

    /// Save, downgrading failures to a warning: the workflow keeps its
    /// in-memory state and the next successful save catches up.
    async fn persist(&self) {
        if let Err(e) = self.write().await {
            warn!("Failed to persist deployment state: {}", e);
        }
    }

    async fn checkpoint(&mut self) {
        self.state.last_checkpoint = self.clock.now();
        self.persist().await;
    }

    /// Move to `phase`, clearing any previous error
    pub async fn advance_to(&mut self, phase: DeploymentPhase) {
        if phase == DeploymentPhase::Failed {
            warn!("advance_to(Failed) ignored, errors are recorded with record_error");
            return;
        }
        if phase < self.state.resume_point() {
            warn!(
                phase = %phase,
                highest = %self.state.resume_point(),
                "Refusing to move the deployment backwards"
            );
            return;
        }

        debug!(from = %self.state.current_phase, to = %phase, "Advancing phase");
        self.state.current_phase = phase;
        self.state.highest_phase = phase;
        self.state.last_error = None;
        self.checkpoint().await;
    }

    /// Store the outcome of `phase`, replacing any earlier entry
    pub async fn record_phase_result(&mut self, phase: DeploymentPhase, result: StepOutcome) {
        let completed_at = self.clock.now();
        self.state.phase_results.insert(
            phase.name().to_string(),
            PhaseRecord {
                result,
                completed_at,
            },
        );
        self.checkpoint().await;
    }

    /// Remember a removed remote record
    pub async fn record_cleaned_device(&mut self, id: &str) {
        if self.state.cleaned_device_ids.insert(id.to_string()) {
            self.checkpoint().await;
        }
    }

    /// Record a fatal error and mark the deployment `Failed`.
    ///
    /// `Failed` is advisory: a later run may still `advance_to` past it.
    pub async fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(phase = %self.state.highest_phase, "Deployment failed: {}", message);
        self.state.last_error = Some(message);
        self.state.current_phase = DeploymentPhase::Failed;
        self.checkpoint().await;
    }

    pub async fn mark_completed(&mut self) {
        self.state.current_phase = DeploymentPhase::Completed;
        self.state.highest_phase = DeploymentPhase::Completed;
        self.checkpoint().await;
    }

    /// Whether a resumed run may skip `phase`.
    ///
    /// Only phases strictly below the last reached phase are skipped. The
    /// last reached phase itself runs again, since the interruption may have
    /// happened part way through it.
    pub fn should_skip(&self, phase: DeploymentPhase) -> bool {
        self.state.is_resume && self.state.resume_point().rank() > phase.rank()
    }

    pub fn was_device_cleaned(&self, id: &str) -> bool {
        self.state.cleaned_device_ids.contains(id)
    }

    pub fn phase_result(&self, phase: DeploymentPhase) -> Option<&PhaseRecord> {
        self.state.phase_results.get(phase.name())
    }

    /// Return to a fresh state and delete the persisted checkpoint
    pub async fn reset(&mut self) -> Result<(), EnrollError> {
        let serial = self.state.device_serial.clone();
        self.state = DeploymentState::new(serial, self.clock.now());
        self.store.delete(&self.key).await?;
        info!("Deployment state reset");
        Ok(())
    }

    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    pub fn current_phase(&self) -> DeploymentPhase {
        self.state.current_phase
    }

    pub fn is_resume(&self) -> bool {
        self.state.is_resume
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::from_state(&self.state)
    }
}

/// Read the persisted checkpoint without device or freshness validation
pub async fn read_checkpoint(
    store: &dyn StateStore,
) -> Result<Option<DeploymentState>, EnrollError> {
    DeploymentStateMachine::read_prior(store, STATE_KEY).await
}

/// Summary of a checkpoint for status inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub session_id: String,
    pub device_serial: String,
    pub current_phase: DeploymentPhase,
    pub phase_rank: u8,
    pub resume_point: DeploymentPhase,
    pub is_resume: bool,
    pub started_at: DateTime<Utc>,
    pub last_checkpoint: DateTime<Utc>,
    pub last_error: Option<String>,
    pub cleaned_device_count: usize,
    pub phases: Vec<PhaseStatus>,
}

/// One phase line of a status report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseStatus {
    pub phase: DeploymentPhase,
    pub success: bool,
    pub message: String,
    pub completed_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn from_state(state: &DeploymentState) -> Self {
        let mut phases: Vec<PhaseStatus> = state
            .phase_results
            .values()
            .map(|record| PhaseStatus {
                phase: record.result.phase,
                success: record.result.success,
                message: record.result.message.clone(),
                completed_at: record.completed_at,
            })
            .collect();
        phases.sort_by_key(|p| p.phase);

        Self {
            session_id: state.session_id.clone(),
            device_serial: state.device_serial.clone(),
            current_phase: state.current_phase,
            phase_rank: state.current_phase.rank(),
            resume_point: state.resume_point(),
            is_resume: state.is_resume,
            started_at: state.started_at,
            last_checkpoint: state.last_checkpoint,
            last_error: state.last_error.clone(),
            cleaned_device_count: state.cleaned_device_ids.len(),
            phases,
        }
    }
}
