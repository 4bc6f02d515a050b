//! Rollback endpoint: turns a `DeploymentConfigRollback` request into a candidate config.
//!
//! Every lookup failure is reported as `Invalid` on `spec.from.name` so
//! callers see one response shape whatever the underlying cause.

use std::sync::Arc;

use tracing::{debug, info, warn};
use vessel_core::kinds::{Deployment, DeploymentConfig, DeploymentConfigRollback, DeploymentConfigRollbackSpec};
use vessel_core::{Codec, Context, Error, FieldError, Object, Result, Validate};
use vessel_registry::Registry;

use crate::generator::RollbackGenerator;
use crate::util::decode_deployment_config;

const FROM_NAME_FIELD: &str = "spec.from.name";

/// Everything the rollback endpoint needs from the rest of the system.
#[async_trait::async_trait]
pub trait GeneratorClient: Send + Sync {
    async fn generate_rollback(
        &self,
        from: &DeploymentConfig,
        to: &DeploymentConfig,
        spec: &DeploymentConfigRollbackSpec,
    ) -> Result<DeploymentConfig>;
    async fn get_deployment(&self, ctx: &Context, name: &str) -> Result<Deployment>;
    async fn get_deployment_config(&self, ctx: &Context, name: &str) -> Result<DeploymentConfig>;
}

/// Client backed by the deployment and deployment config registries.
#[derive(Clone)]
pub struct RegistryGeneratorClient {
    deployments: Registry<Deployment>,
    configs: Registry<DeploymentConfig>,
    generator: RollbackGenerator,
}

impl RegistryGeneratorClient {
    pub fn new(deployments: Registry<Deployment>, configs: Registry<DeploymentConfig>) -> Self {
        Self { deployments, configs, generator: RollbackGenerator }
    }
}

#[async_trait::async_trait]
impl GeneratorClient for RegistryGeneratorClient {
    async fn generate_rollback(
        &self,
        from: &DeploymentConfig,
        to: &DeploymentConfig,
        spec: &DeploymentConfigRollbackSpec,
    ) -> Result<DeploymentConfig> {
        Ok(self.generator.generate_rollback(from, to, spec))
    }

    async fn get_deployment(&self, ctx: &Context, name: &str) -> Result<Deployment> {
        self.deployments.get(ctx, name).await
    }

    async fn get_deployment_config(&self, ctx: &Context, name: &str) -> Result<DeploymentConfig> {
        self.configs.get(ctx, name).await
    }
}

pub struct RollbackRest {
    client: Arc<dyn GeneratorClient>,
    codec: Arc<dyn Codec>,
}

impl RollbackRest {
    pub fn new(client: Arc<dyn GeneratorClient>, codec: Arc<dyn Codec>) -> Self {
        Self { client, codec }
    }

    pub fn new_object(&self) -> DeploymentConfigRollback {
        DeploymentConfigRollback::default()
    }

    /// Generate, but do not persist, the config that rolls back to `rollback.spec.from`.
    pub async fn create(&self, ctx: &Context, rollback: DeploymentConfigRollback) -> Result<DeploymentConfig> {
        let errs = rollback.validate();
        if !errs.is_empty() {
            return Err(Error::invalid(DeploymentConfigRollback::KIND, "", errs));
        }
        let from_name = rollback.from_name();
        let namespace = ctx.namespace().unwrap_or("");

        let target = match self.client.get_deployment(ctx, from_name).await {
            Ok(d) => d,
            Err(e) if e.is_not_found() => return Err(invalid_from(from_name, "Deployment not found")),
            Err(e) => return Err(invalid_from(from_name, e.to_string())),
        };

        let to = decode_deployment_config(&target, self.codec.as_ref()).map_err(|e| {
            warn!(deployment = %from_name, error = %e, "deploy: embedded config unreadable");
            invalid_from(from_name, format!("Couldn't decode deploymentConfig from deployment: {e}"))
        })?;

        let current = match self.client.get_deployment_config(ctx, to.name()).await {
            Ok(c) => c,
            Err(e) if e.is_not_found() => {
                return Err(invalid_from(
                    from_name,
                    format!("Couldn't find a current deploymentConfig {namespace}/{}", to.name()),
                ))
            }
            Err(e) => {
                return Err(invalid_from(
                    from_name,
                    format!("Error finding current deploymentConfig {namespace}/{}: {e}", to.name()),
                ))
            }
        };
        debug!(deployment = %from_name, config = %current.name(), "deploy: rollback sources resolved");

        let candidate = self.client.generate_rollback(&current, &to, &rollback.spec).await?;
        info!(
            deployment = %from_name,
            config = %candidate.name(),
            version = candidate.latest_version,
            "deploy: rollback candidate"
        );
        Ok(candidate)
    }
}

fn invalid_from(from_name: &str, reason: impl Into<String>) -> Error {
    Error::invalid(DeploymentConfigRollback::KIND, "", vec![FieldError::invalid(FROM_NAME_FIELD, from_name, reason)])
}
