//! Deployment module

pub mod cleanup;
pub mod fsm;
pub mod outcome;
pub mod phase;
pub mod state;

pub use cleanup::{CleanupCoordinator, CleanupRecord, CleanupSummary, RemoteServices};
pub use fsm::{DeploymentStateMachine, StatusReport};
pub use outcome::StepOutcome;
pub use phase::DeploymentPhase;
pub use state::DeploymentState;
