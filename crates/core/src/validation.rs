//! Structural validation rule sets, one per kind.
//!
//! Rules only look at the object itself. An empty result means valid.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::kinds::{
    BuildConfig, Deployment, DeploymentConfig, DeploymentConfigRollback, DeploymentStrategy, DeploymentStrategyType,
    DeploymentTriggerType, Image, ImageRepository, Route,
};
use crate::FieldError;

static DNS_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));
static DNS_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("valid regex")
});

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

pub fn is_dns_label(value: &str) -> bool {
    value.len() <= MAX_LABEL_LEN && DNS_LABEL.is_match(value)
}

pub fn is_dns_subdomain(value: &str) -> bool {
    value.len() <= MAX_NAME_LEN && DNS_SUBDOMAIN.is_match(value)
}

/// Names become store key segments, so they must not contain path separators.
fn validate_name(name: &str) -> Option<FieldError> {
    if name.is_empty() {
        return Some(FieldError::required("metadata.name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Some(FieldError::invalid("metadata.name", name, format!("must be no more than {MAX_NAME_LEN} characters")));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Some(FieldError::invalid("metadata.name", name, "may not contain '/' or be '.' or '..'"));
    }
    None
}

pub fn validate_object_meta(meta: &ObjectMeta) -> Vec<FieldError> {
    let mut errs = Vec::new();
    if let Some(err) = validate_name(meta.name.as_deref().unwrap_or("")) {
        errs.push(err);
    }
    if let Some(ns) = meta.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        if !is_dns_label(ns) {
            errs.push(FieldError::invalid("metadata.namespace", ns, "must be a DNS label"));
        }
    }
    errs
}

pub trait Validate {
    fn validate(&self) -> Vec<FieldError>;

    fn validate_update(&self) -> Vec<FieldError> {
        self.validate()
    }
}

impl Validate for Route {
    fn validate(&self) -> Vec<FieldError> {
        let mut errs = validate_object_meta(&self.metadata);
        if self.host.is_empty() {
            errs.push(FieldError::required("host"));
        } else if !is_dns_subdomain(&self.host) {
            errs.push(FieldError::invalid("host", &self.host, "must be a DNS subdomain"));
        }
        if self.service_name.is_empty() {
            errs.push(FieldError::required("serviceName"));
        }
        errs
    }
}

impl Validate for BuildConfig {
    fn validate(&self) -> Vec<FieldError> {
        let mut errs = validate_object_meta(&self.metadata);
        let input = &self.desired_input;
        if input.source_uri.is_empty() {
            errs.push(FieldError::required("desiredInput.sourceURI"));
        }
        if input.image_tag.is_empty() {
            errs.push(FieldError::required("desiredInput.imageTag"));
        }
        if let Some(sti) = &input.sti_input {
            if sti.builder_image.is_empty() {
                errs.push(FieldError::required("desiredInput.stiInput.builderImage"));
            }
        }
        errs
    }
}

fn validate_strategy(strategy: &DeploymentStrategy, field: &str) -> Vec<FieldError> {
    let mut errs = Vec::new();
    if strategy.type_ == DeploymentStrategyType::Custom {
        match &strategy.custom_params {
            None => errs.push(FieldError::required(format!("{field}.customParams"))),
            Some(p) if p.image.is_empty() => errs.push(FieldError::required(format!("{field}.customParams.image"))),
            Some(_) => {}
        }
    }
    errs
}

impl Validate for DeploymentConfig {
    fn validate(&self) -> Vec<FieldError> {
        let mut errs = validate_object_meta(&self.metadata);
        errs.extend(validate_strategy(&self.template.strategy, "template.strategy"));
        let replicas = self.template.controller_template.replicas;
        if replicas < 0 {
            errs.push(FieldError::invalid(
                "template.controllerTemplate.replicas",
                replicas.to_string(),
                "must be non-negative",
            ));
        }
        for (i, trigger) in self.triggers.iter().enumerate() {
            if trigger.type_ != DeploymentTriggerType::ImageChange {
                continue;
            }
            match &trigger.image_change_params {
                None => errs.push(FieldError::required(format!("triggers[{i}].imageChangeParams"))),
                Some(p) if p.repository_name.is_empty() && p.from.is_none() => {
                    errs.push(FieldError::required(format!("triggers[{i}].imageChangeParams.repositoryName")))
                }
                Some(_) => {}
            }
        }
        errs
    }
}

impl Validate for Deployment {
    fn validate(&self) -> Vec<FieldError> {
        let mut errs = validate_object_meta(&self.metadata);
        errs.extend(validate_strategy(&self.strategy, "strategy"));
        let replicas = self.controller_template.replicas;
        if replicas < 0 {
            errs.push(FieldError::invalid("controllerTemplate.replicas", replicas.to_string(), "must be non-negative"));
        }
        errs
    }
}

impl Validate for Image {
    fn validate(&self) -> Vec<FieldError> {
        let mut errs = validate_object_meta(&self.metadata);
        if self.docker_image_reference.is_empty() {
            errs.push(FieldError::required("dockerImageReference"));
        }
        errs
    }
}

impl Validate for ImageRepository {
    fn validate(&self) -> Vec<FieldError> {
        validate_object_meta(&self.metadata)
    }
}

impl Validate for DeploymentConfigRollback {
    fn validate(&self) -> Vec<FieldError> {
        let mut errs = Vec::new();
        if self.from_name().is_empty() {
            errs.push(FieldError::required("spec.from.name"));
        }
        errs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{BuildInput, StiBuildInput};

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta { name: Some(name.to_string()), ..Default::default() }
    }

    fn build_config(source_uri: &str, image_tag: &str, sti: Option<&str>) -> BuildConfig {
        BuildConfig {
            metadata: meta("abc"),
            desired_input: BuildInput {
                source_uri: source_uri.to_string(),
                image_tag: image_tag.to_string(),
                sti_input: sti.map(|b| StiBuildInput { builder_image: b.to_string(), clean: false }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn build_config_failure_cases() {
        let cases = [
            ("blank sourceURI", build_config("", "data/image", Some("builder/image")), "desiredInput.sourceURI"),
            ("blank imageTag", build_config("http://github.com/test/source", "", None), "desiredInput.imageTag"),
            (
                "blank builderImage",
                build_config("http://github.com/test/source", "data/image", Some("")),
                "desiredInput.stiInput.builderImage",
            ),
        ];
        for (desc, bc, field) in cases {
            let errs = bc.validate();
            assert_eq!(errs.len(), 1, "{desc}: {errs:?}");
            assert_eq!(errs[0].field, field, "{desc}");
        }
        assert!(build_config("http://github.com/test/source", "data/image", None).validate().is_empty());
    }

    #[test]
    fn route_requires_host_and_service() {
        let mut route = Route { metadata: meta("foo"), ..Default::default() };
        let fields: Vec<_> = route.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["host", "serviceName"]);
        route.host = "www.frontend.com".into();
        route.service_name = "myrubyservice".into();
        assert!(route.validate().is_empty());
        route.host = "Not A Host".into();
        assert_eq!(route.validate()[0].field, "host");
    }

    #[test]
    fn names_must_be_path_safe() {
        let image = Image { metadata: meta("a/b"), docker_image_reference: "x".into() };
        assert_eq!(image.validate()[0].field, "metadata.name");
        let repo = ImageRepository { metadata: meta(""), ..Default::default() };
        assert_eq!(repo.validate()[0].error_type, crate::FieldErrorType::Required);
    }

    #[test]
    fn namespace_must_be_dns_label() {
        let mut m = meta("foo");
        m.namespace = Some("Bad_NS".into());
        assert_eq!(validate_object_meta(&m)[0].field, "metadata.namespace");
        m.namespace = Some("legal-name".into());
        assert!(validate_object_meta(&m).is_empty());
    }

    #[test]
    fn rollback_requires_from_name() {
        let mut rb = DeploymentConfigRollback::default();
        assert_eq!(rb.validate()[0].field, "spec.from.name");
        rb.spec.from.name = Some("foo-1".into());
        assert!(rb.validate().is_empty());
    }
}
