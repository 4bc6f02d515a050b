use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ObjectReference, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::{Labels, Object, UpdatePolicy};

/// Desired deployment state plus the triggers that produce new deployments from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentConfig {
    pub metadata: ObjectMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<DeploymentTriggerPolicy>,
    pub template: DeploymentTemplate,
    /// Incremented each time a new deployment is produced from this config.
    pub latest_version: i64,
}

impl Object for DeploymentConfig {
    const KIND: &'static str = "DeploymentConfig";
    const PATH: &'static str = "/deploymentConfigs";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentTemplate {
    pub strategy: DeploymentStrategy,
    pub controller_template: ControllerTemplate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStrategyType {
    #[default]
    Recreate,
    Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentStrategy {
    #[serde(rename = "type")]
    pub type_: DeploymentStrategyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_params: Option<CustomDeploymentStrategyParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomDeploymentStrategyParams {
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvVar>,
}

/// Replication settings stamped onto every deployment of a config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerTemplate {
    pub replicas: i32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub replica_selector: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentTriggerType {
    #[default]
    ConfigChange,
    ImageChange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentTriggerPolicy {
    #[serde(rename = "type")]
    pub type_: DeploymentTriggerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_change_params: Option<DeploymentTriggerImageChangeParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentTriggerImageChangeParams {
    /// Deploy as soon as the watched image changes.
    pub automatic: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub container_names: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub repository_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ObjectReference>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    #[default]
    New,
    Pending,
    Running,
    Complete,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::New => "New",
            DeploymentStatus::Pending => "Pending",
            DeploymentStatus::Running => "Running",
            DeploymentStatus::Complete => "Complete",
            DeploymentStatus::Failed => "Failed",
        }
    }
}

/// One rollout of a deployment config.
///
/// The producing config is embedded, encoded, in the
/// `encodedDeploymentConfig` annotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Deployment {
    pub metadata: ObjectMeta,
    pub strategy: DeploymentStrategy,
    pub controller_template: ControllerTemplate,
    pub status: DeploymentStatus,
}

impl Object for Deployment {
    const KIND: &'static str = "Deployment";
    const PATH: &'static str = "/deployments";
    const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::Optimistic;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn field_set(&self) -> Labels {
        let mut fields = Labels::new();
        fields.insert("name".to_string(), self.name().to_string());
        fields.insert("namespace".to_string(), self.namespace().to_string());
        fields.insert("status".to_string(), self.status.as_str().to_string());
        fields
    }
}

/// Request to generate a config that reverts to the state captured in a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentConfigRollback {
    pub metadata: ObjectMeta,
    pub spec: DeploymentConfigRollbackSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentConfigRollbackSpec {
    /// The deployment to roll back to.
    pub from: ObjectReference,
    pub include_triggers: bool,
    pub include_template: bool,
    pub include_replication_meta: bool,
    pub include_strategy: bool,
}

impl DeploymentConfigRollback {
    pub const KIND: &'static str = "DeploymentConfigRollback";

    /// Name of the target deployment, empty when unset.
    pub fn from_name(&self) -> &str {
        self.spec.from.name.as_deref().unwrap_or("")
    }
}
