//! Phase outcomes

use serde::{Deserialize, Serialize};

use crate::deploy::phase::DeploymentPhase;

/// Result of executing one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    pub message: String,
    pub phase: DeploymentPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl StepOutcome {
    pub fn success(phase: DeploymentPhase, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            phase,
            data: None,
            cause: None,
        }
    }

    pub fn failure(
        phase: DeploymentPhase,
        message: impl Into<String>,
        cause: Option<String>,
    ) -> Self {
        Self {
            success: false,
            message: message.into(),
            phase,
            data: None,
            cause,
        }
    }

    /// Attach structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
