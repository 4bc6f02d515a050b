use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::{Labels, Object};

/// Externally reachable host name mapped onto a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Route {
    pub metadata: ObjectMeta,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_name: String,
}

impl Object for Route {
    const KIND: &'static str = "Route";
    const PATH: &'static str = "/routes";
    const GENERATE_NAME: bool = true;

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
        fields.insert("host".to_string(), self.host.clone());
        fields.insert("serviceName".to_string(), self.service_name.clone());
        fields
    }
}
