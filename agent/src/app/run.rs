//! Main enrollment workflow

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::app::context::DeploymentContext;
use crate::authn::certificate::{BundleDecoder, CertificateValidator, Credential};
use crate::authn::secrets::SecretStore;
use crate::deploy::cleanup::{CleanupCoordinator, CleanupSummary, RemoteServices};
use crate::deploy::fsm::DeploymentStateMachine;
use crate::deploy::outcome::StepOutcome;
use crate::deploy::phase::DeploymentPhase;
use crate::errors::EnrollError;
use crate::services::RemoteSystem;

/// Executes the phases that talk to external collaborators
/// (module bootstrap, interactive sign-in, group selection, registration UI).
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    /// Run a phase the workflow does not implement itself
    async fn run_phase(
        &self,
        phase: DeploymentPhase,
        context: &DeploymentContext,
    ) -> Result<StepOutcome, EnrollError>;

    /// Authenticate to the management API with the enrollment certificate
    async fn connect_with_certificate(
        &self,
        credential: &Credential,
    ) -> Result<StepOutcome, EnrollError>;
}

/// Result of one workflow invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub session_id: String,
    pub resumed: bool,
    pub executed: Vec<DeploymentPhase>,
    pub skipped: Vec<DeploymentPhase>,
    pub cleanup: CleanupSummary,
}

/// Drives the phase sequence against the checkpoint
pub struct Workflow {
    context: DeploymentContext,
    runner: Arc<dyn PhaseRunner>,
    validator: CertificateValidator,
    cleanup: CleanupCoordinator,
}

impl Workflow {
    pub fn new(
        context: DeploymentContext,
        runner: Arc<dyn PhaseRunner>,
        secrets: Arc<dyn SecretStore>,
        decoder: Arc<dyn BundleDecoder>,
        services: RemoteServices,
    ) -> Self {
        let validator = context.certificate_validator(secrets, decoder);
        let cleanup = context.cleanup_coordinator(services);
        Self {
            context,
            runner,
            validator,
            cleanup,
        }
    }

    pub fn context(&self) -> &DeploymentContext {
        &self.context
    }

    /// Load this device's checkpoint and run the workflow to completion
    pub async fn run(&mut self) -> Result<WorkflowSummary, EnrollError> {
        let mut sm = self.context.load_state().await;
        self.run_with(&mut sm).await
    }

    /// Run against an already loaded state machine.
    ///
    /// Phases below the resume point are skipped. A fatal error is recorded
    /// in the checkpoint before it is returned, so the next run resumes at
    /// the failed phase.
    pub async fn run_with(
        &mut self,
        sm: &mut DeploymentStateMachine,
    ) -> Result<WorkflowSummary, EnrollError> {
        let session_id = sm.state().session_id.clone();
        let resumed = sm.is_resume();
        info!(
            %session_id,
            resumed,
            serial = %self.context.identity.serial_number,
            "Starting enrollment workflow"
        );

        let mut executed = Vec::new();
        let mut skipped = Vec::new();

        for &phase in DeploymentPhase::sequence() {
            if sm.should_skip(phase) {
                info!(%phase, "Skipping phase completed in a previous run");
                skipped.push(phase);
                continue;
            }

            sm.advance_to(phase).await;
            info!(%phase, rank = phase.rank(), "Running phase");

            let outcome = match self.execute(phase, sm).await {
                Ok(outcome) if outcome.success => outcome,
                Ok(outcome) => {
                    let err = EnrollError::PhaseFailed {
                        phase: phase.to_string(),
                        message: outcome.message.clone(),
                    };
                    return Err(self.fail(sm, phase, outcome, err).await);
                }
                Err(e) => {
                    let cause = Some(format!("{:?}", e.kind()));
                    let outcome = StepOutcome::failure(phase, e.to_string(), cause);
                    return Err(self.fail(sm, phase, outcome, e).await);
                }
            };

            info!(%phase, "{}", outcome.message);
            sm.record_phase_result(phase, outcome).await;
            executed.push(phase);
        }

        sm.mark_completed().await;
        info!(
            %session_id,
            executed = executed.len(),
            skipped = skipped.len(),
            "Enrollment workflow completed"
        );

        Ok(WorkflowSummary {
            session_id,
            resumed,
            executed,
            skipped,
            cleanup: self.cleanup.summary().clone(),
        })
    }

    async fn fail(
        &self,
        sm: &mut DeploymentStateMachine,
        phase: DeploymentPhase,
        outcome: StepOutcome,
        err: EnrollError,
    ) -> EnrollError {
        error!(%phase, error = %err, "Phase failed");
        sm.record_phase_result(phase, outcome).await;
        sm.record_error(format!("{}: {}", phase, err)).await;
        err
    }

    async fn execute(
        &mut self,
        phase: DeploymentPhase,
        sm: &mut DeploymentStateMachine,
    ) -> Result<StepOutcome, EnrollError> {
        match phase {
            DeploymentPhase::KeyVaultAccess => self.check_certificate().await,
            DeploymentPhase::GraphAuthentication => self.connect().await,
            DeploymentPhase::DeviceCleanup => self.resolve_identity(),
            DeploymentPhase::EntraCleanup => {
                self.run_cleanup(phase, RemoteSystem::Directory, sm).await
            }
            DeploymentPhase::IntuneCleanup => {
                self.run_cleanup(phase, RemoteSystem::DeviceManagement, sm).await
            }
            DeploymentPhase::AutopilotCleanup => {
                self.run_cleanup(phase, RemoteSystem::Provisioning, sm).await
            }
            _ => self.runner.run_phase(phase, &self.context).await,
        }
    }

    async fn retrieve_credential(&self) -> Result<Credential, EnrollError> {
        let vault = &self.context.settings.key_vault;
        self.validator
            .retrieve(&vault.vault_name, &vault.certificate_secret, &vault.password_secret)
            .await
    }

    async fn check_certificate(&self) -> Result<StepOutcome, EnrollError> {
        let mut credential = self.retrieve_credential().await?;
        let now = self.context.clock.now();
        let message = match credential.expiry_warning() {
            Some(days) => format!("Certificate valid, expires in {} day(s)", days),
            None => "Certificate valid".to_string(),
        };
        let outcome = StepOutcome::success(DeploymentPhase::KeyVaultAccess, message)
            .with_data(credential.describe(now));
        credential.clear();
        Ok(outcome)
    }

    /// Key material never outlives a single phase
    async fn connect(&self) -> Result<StepOutcome, EnrollError> {
        let mut credential = self.retrieve_credential().await?;
        let result = self.runner.connect_with_certificate(&credential).await;
        credential.clear();
        result
    }

    fn resolve_identity(&self) -> Result<StepOutcome, EnrollError> {
        let identity = &self.context.identity;
        let directory_keys = self.cleanup.identity_keys(RemoteSystem::Directory)?;
        let serial_keys = self.cleanup.identity_keys(RemoteSystem::Provisioning)?;
        if serial_keys.is_empty() {
            warn!("Serial number unknown, serial-keyed cleanup will be skipped");
        }

        Ok(StepOutcome::success(
            DeploymentPhase::DeviceCleanup,
            format!("Resolved {} identity key(s)", directory_keys.len()),
        )
        .with_data(json!({
            "serialNumber": identity.serial(),
            "computerName": identity.computer_name(),
            "directoryKeys": directory_keys,
            "serialKeys": serial_keys,
        })))
    }

    async fn run_cleanup(
        &mut self,
        phase: DeploymentPhase,
        system: RemoteSystem,
        sm: &mut DeploymentStateMachine,
    ) -> Result<StepOutcome, EnrollError> {
        let removed = match system {
            RemoteSystem::Directory => self.cleanup.cleanup_directory_records(sm).await?,
            RemoteSystem::DeviceManagement => {
                self.cleanup.cleanup_managed_device_records(sm).await?
            }
            RemoteSystem::Provisioning => self.cleanup.cleanup_provisioning_records(sm).await?,
        };
        Ok(
            StepOutcome::success(phase, format!("Removed {} {} record(s)", removed, system))
                .with_data(json!({ "system": system, "removed": removed })),
        )
    }
}
