//! Application wiring: context, time sources and the workflow

pub mod clock;
pub mod context;
pub mod diagnostic;
pub mod run;

pub use context::DeploymentContext;
pub use run::{PhaseRunner, Workflow, WorkflowSummary};
