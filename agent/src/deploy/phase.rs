//! Deployment phases, totally ordered by rank

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A phase of the enrollment workflow.
///
/// Phases compare by `rank()`. Skip decisions on resume depend on this
/// ordering, so variants must not be reordered without revisiting every
/// comparison. `Failed` is an absorbing marker outside the normal sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentPhase {
    #[default]
    NotStarted,
    PreFlightChecks,
    ModuleInstallation,
    AzureAuthentication,
    KeyVaultAccess,
    GraphAuthentication,
    DeviceCleanup,
    EntraCleanup,
    IntuneCleanup,
    AutopilotCleanup,
    GroupValidation,
    DeviceRegistration,
    #[serde(rename = "OOBELaunch")]
    OobeLaunch,
    Completed,
    Failed,
}

/// The executable phases, in order
const SEQUENCE: [DeploymentPhase; 12] = [
    DeploymentPhase::PreFlightChecks,
    DeploymentPhase::ModuleInstallation,
    DeploymentPhase::AzureAuthentication,
    DeploymentPhase::KeyVaultAccess,
    DeploymentPhase::GraphAuthentication,
    DeploymentPhase::DeviceCleanup,
    DeploymentPhase::EntraCleanup,
    DeploymentPhase::IntuneCleanup,
    DeploymentPhase::AutopilotCleanup,
    DeploymentPhase::GroupValidation,
    DeploymentPhase::DeviceRegistration,
    DeploymentPhase::OobeLaunch,
];

impl DeploymentPhase {
    /// Integer rank used for ordering
    pub const fn rank(self) -> u8 {
        match self {
            DeploymentPhase::NotStarted => 0,
            DeploymentPhase::PreFlightChecks => 1,
            DeploymentPhase::ModuleInstallation => 2,
            DeploymentPhase::AzureAuthentication => 3,
            DeploymentPhase::KeyVaultAccess => 4,
            DeploymentPhase::GraphAuthentication => 5,
            DeploymentPhase::DeviceCleanup => 6,
            DeploymentPhase::EntraCleanup => 7,
            DeploymentPhase::IntuneCleanup => 8,
            DeploymentPhase::AutopilotCleanup => 9,
            DeploymentPhase::GroupValidation => 10,
            DeploymentPhase::DeviceRegistration => 11,
            DeploymentPhase::OobeLaunch => 12,
            DeploymentPhase::Completed => 13,
            DeploymentPhase::Failed => 99,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(DeploymentPhase::NotStarted),
            13 => Some(DeploymentPhase::Completed),
            99 => Some(DeploymentPhase::Failed),
            n => SEQUENCE.get(usize::from(n).checked_sub(1)?).copied(),
        }
    }

    /// Phase name as persisted and logged
    pub fn name(self) -> &'static str {
        match self {
            DeploymentPhase::NotStarted => "NotStarted",
            DeploymentPhase::PreFlightChecks => "PreFlightChecks",
            DeploymentPhase::ModuleInstallation => "ModuleInstallation",
            DeploymentPhase::AzureAuthentication => "AzureAuthentication",
            DeploymentPhase::KeyVaultAccess => "KeyVaultAccess",
            DeploymentPhase::GraphAuthentication => "GraphAuthentication",
            DeploymentPhase::DeviceCleanup => "DeviceCleanup",
            DeploymentPhase::EntraCleanup => "EntraCleanup",
            DeploymentPhase::IntuneCleanup => "IntuneCleanup",
            DeploymentPhase::AutopilotCleanup => "AutopilotCleanup",
            DeploymentPhase::GroupValidation => "GroupValidation",
            DeploymentPhase::DeviceRegistration => "DeviceRegistration",
            DeploymentPhase::OobeLaunch => "OOBELaunch",
            DeploymentPhase::Completed => "Completed",
            DeploymentPhase::Failed => "Failed",
        }
    }

    /// Phases the orchestrator executes, from PreFlightChecks to OOBELaunch
    pub fn sequence() -> &'static [DeploymentPhase] {
        &SEQUENCE
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentPhase::Completed | DeploymentPhase::Failed)
    }
}

impl PartialOrd for DeploymentPhase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeploymentPhase {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
