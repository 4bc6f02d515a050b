//! Deployment helpers: embedding a config snapshot in the deployments it produces.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use vessel_core::codec::{decode, encode};
use vessel_core::kinds::{Deployment, DeploymentConfig, DeploymentStatus};
use vessel_core::{Codec, Error, Object, Result};

/// Encoded producing config.
pub const ENCODED_DEPLOYMENT_CONFIG_ANNOTATION: &str = "encodedDeploymentConfig";
/// Name of the producing config.
pub const DEPLOYMENT_CONFIG_ANNOTATION: &str = "deploymentConfig";
/// `latestVersion` of the producing config.
pub const DEPLOYMENT_VERSION_ANNOTATION: &str = "deploymentVersion";

/// Name of the deployment produced by `config` at its current version.
pub fn latest_deployment_name(config: &DeploymentConfig) -> String {
    format!("{}-{}", config.name(), config.latest_version)
}

pub fn encode_deployment_config(config: &DeploymentConfig, codec: &dyn Codec) -> Result<String> {
    let bytes = encode(codec, config).map_err(|e| Error::Internal(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::Internal(format!("encoded {} is not text: {e}", DeploymentConfig::KIND)))
}

/// Decode the config snapshot embedded in `deployment`.
pub fn decode_deployment_config(deployment: &Deployment, codec: &dyn Codec) -> Result<DeploymentConfig> {
    let encoded = deployment
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(ENCODED_DEPLOYMENT_CONFIG_ANNOTATION))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::DecodeFailure(format!(
                "deployment {} has no {ENCODED_DEPLOYMENT_CONFIG_ANNOTATION} annotation",
                deployment.name()
            ))
        })?;
    decode::<DeploymentConfig>(codec, encoded.as_bytes()).map_err(|e| Error::DecodeFailure(e.to_string()))
}

/// Build the deployment for `config`'s current version, embedding the config.
pub fn make_deployment(config: &DeploymentConfig, codec: &dyn Codec) -> Result<Deployment> {
    let mut snapshot = config.clone();
    snapshot.metadata.resource_version = None;
    let encoded = encode_deployment_config(&snapshot, codec)?;

    let mut annotations = BTreeMap::new();
    annotations.insert(DEPLOYMENT_CONFIG_ANNOTATION.to_string(), config.name().to_string());
    annotations.insert(DEPLOYMENT_VERSION_ANNOTATION.to_string(), config.latest_version.to_string());
    annotations.insert(ENCODED_DEPLOYMENT_CONFIG_ANNOTATION.to_string(), encoded);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(latest_deployment_name(config)),
            namespace: config.metadata.namespace.clone(),
            labels: config.metadata.labels.clone(),
            annotations: Some(annotations),
            ..Default::default()
        },
        strategy: config.template.strategy.clone(),
        controller_template: config.template.controller_template.clone(),
        status: DeploymentStatus::New,
    })
}
