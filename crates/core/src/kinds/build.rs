use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::{Object, UpdatePolicy};

/// Recipe for producing an image from source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    pub metadata: ObjectMeta,
    pub desired_input: BuildInput,
    /// Shared secret for webhook-triggered builds.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildInput {
    #[serde(rename = "sourceURI")]
    pub source_uri: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_ref: String,
    pub image_tag: String,
    #[serde(rename = "stiInput", skip_serializing_if = "Option::is_none")]
    pub sti_input: Option<StiBuildInput>,
}

/// Source-to-image build parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StiBuildInput {
    pub builder_image: String,
    pub clean: bool,
}

impl Object for BuildConfig {
    const KIND: &'static str = "BuildConfig";
    const PATH: &'static str = "/buildConfigs";
    const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::Optimistic;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
