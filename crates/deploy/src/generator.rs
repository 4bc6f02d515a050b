use metrics::counter;
use tracing::debug;
use vessel_core::kinds::{DeploymentConfig, DeploymentConfigRollbackSpec, DeploymentTriggerType};
use vessel_core::Object;

/// Produces rollback candidates. Holds no state and never persists anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackGenerator;

impl RollbackGenerator {
    /// Candidate that reverts the live config `from` to the snapshot `to`.
    ///
    /// Starts from `from` and copies over the parts of `to` selected by
    /// `spec`. Image-change triggers come back non-automatic so the rollback
    /// is not immediately redeployed over.
    pub fn generate_rollback(
        &self,
        from: &DeploymentConfig,
        to: &DeploymentConfig,
        spec: &DeploymentConfigRollbackSpec,
    ) -> DeploymentConfig {
        let mut rollback = from.clone();

        if spec.include_triggers {
            rollback.triggers = to.triggers.clone();
        }
        if spec.include_template {
            rollback.template.controller_template.pod_template = to.template.controller_template.pod_template.clone();
        }
        if spec.include_replication_meta {
            rollback.template.controller_template.replicas = to.template.controller_template.replicas;
            rollback.template.controller_template.replica_selector =
                to.template.controller_template.replica_selector.clone();
        }
        if spec.include_strategy {
            rollback.template.strategy = to.template.strategy.clone();
        }

        for trigger in rollback.triggers.iter_mut().filter(|t| t.type_ == DeploymentTriggerType::ImageChange) {
            if let Some(params) = trigger.image_change_params.as_mut() {
                params.automatic = false;
            }
        }

        rollback.latest_version += 1;
        counter!("rollback_generated_total", 1u64);
        debug!(config = %from.name(), version = rollback.latest_version, "deploy: rollback generated");
        rollback
    }
}
