//! Persisted deployment checkpoint

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::outcome::StepOutcome;
use crate::deploy::phase::DeploymentPhase;
use crate::utils::generate_uuid;

/// Result entry for one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub result: StepOutcome,
    pub completed_at: DateTime<Utc>,
}

/// Checkpoint for one device, persisted after every mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentState {
    /// Correlates log records across restarts of one logical session
    pub session_id: String,

    /// Latest phase marker, `Failed` after a fatal error
    pub current_phase: DeploymentPhase,

    /// Highest phase reached, never `Failed`; resume decisions use this
    #[serde(default)]
    pub highest_phase: DeploymentPhase,

    pub started_at: DateTime<Utc>,
    pub last_checkpoint: DateTime<Utc>,

    /// One entry per phase name
    #[serde(default)]
    pub phase_results: BTreeMap<String, PhaseRecord>,

    /// Remote record ids already removed in this session; only ever grows
    #[serde(default)]
    pub cleaned_device_ids: BTreeSet<String>,

    #[serde(default)]
    pub last_error: Option<String>,

    /// Set on load when a fresh checkpoint for this device was found
    #[serde(default)]
    pub is_resume: bool,

    /// Serial of the device that wrote this checkpoint
    pub device_serial: String,
}

impl DeploymentState {
    /// A fresh state for `device_serial` starting at `now`
    pub fn new(device_serial: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: generate_uuid(),
            current_phase: DeploymentPhase::NotStarted,
            highest_phase: DeploymentPhase::NotStarted,
            started_at: now,
            last_checkpoint: now,
            phase_results: BTreeMap::new(),
            cleaned_device_ids: BTreeSet::new(),
            last_error: None,
            is_resume: false,
            device_serial: device_serial.into(),
        }
    }

    /// Phase from which a resumed run re-executes
    pub fn resume_point(&self) -> DeploymentPhase {
        self.highest_phase.max(match self.current_phase {
            DeploymentPhase::Failed => DeploymentPhase::NotStarted,
            phase => phase,
        })
    }
}
