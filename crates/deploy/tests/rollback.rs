#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use vessel_core::kinds::{
    Deployment, DeploymentConfig, DeploymentConfigRollback, DeploymentConfigRollbackSpec, DeploymentTriggerImageChangeParams,
    DeploymentTriggerPolicy, DeploymentTriggerType,
};
use vessel_core::{Codec, Context, Error, JsonCodec, Object, Result};
use vessel_deploy::{make_deployment, GeneratorClient, RegistryGeneratorClient, RollbackRest};
use vessel_registry::Registries;
use vessel_store::{MemoryBackend, VersionedStore};

fn config(name: &str, version: i64) -> DeploymentConfig {
    let mut c = DeploymentConfig::default();
    c.metadata.name = Some(name.into());
    c.metadata.namespace = Some("default".into());
    c.latest_version = version;
    c
}

fn rollback(from: &str) -> DeploymentConfigRollback {
    let mut rb = DeploymentConfigRollback::default();
    rb.spec.from.name = Some(from.into());
    rb
}

/// Client with canned lookups that records what generation was asked for.
#[derive(Default)]
struct Scripted {
    deployment: Option<Result<Deployment>>,
    config: Option<Result<DeploymentConfig>>,
    generated: Mutex<Vec<(String, String)>>,
}

#[async_trait::async_trait]
impl GeneratorClient for Scripted {
    async fn generate_rollback(
        &self,
        from: &DeploymentConfig,
        to: &DeploymentConfig,
        _spec: &DeploymentConfigRollbackSpec,
    ) -> Result<DeploymentConfig> {
        self.generated.lock().unwrap().push((from.name().to_string(), to.name().to_string()));
        Ok(from.clone())
    }

    async fn get_deployment(&self, _ctx: &Context, name: &str) -> Result<Deployment> {
        self.deployment.clone().unwrap_or_else(|| Err(Error::not_found("Deployment", name)))
    }

    async fn get_deployment_config(&self, _ctx: &Context, name: &str) -> Result<DeploymentConfig> {
        self.config.clone().unwrap_or_else(|| Err(Error::not_found("DeploymentConfig", name)))
    }
}

fn codec() -> Arc<dyn Codec> {
    Arc::new(JsonCodec::default())
}

fn scripted_rest(client: Scripted) -> (Arc<Scripted>, RollbackRest) {
    let client = Arc::new(client);
    (client.clone(), RollbackRest::new(client, codec()))
}

fn deployment_of(name: &str, config_name: &str) -> Deployment {
    let mut d = make_deployment(&config(config_name, 1), &JsonCodec::default()).unwrap();
    d.metadata.name = Some(name.into());
    d
}

fn field_detail(err: &Error) -> String {
    match err {
        Error::Invalid { causes, .. } => {
            assert_eq!(causes.len(), 1);
            assert_eq!(causes[0].field, "spec.from.name");
            causes[0].detail.clone()
        }
        other => panic!("expected Invalid, got {other:?}"),
    }
}

#[tokio::test]
async fn generates_from_live_config_and_snapshot() {
    let (client, rest) = scripted_rest(Scripted {
        deployment: Some(Ok(deployment_of("foo", "bar"))),
        config: Some(Ok(config("bar", 4))),
        ..Default::default()
    });
    let out = rest.create(&Context::default_namespace(), rollback("foo")).await.unwrap();
    assert_eq!(out, config("bar", 4));
    assert_eq!(client.generated.lock().unwrap().as_slice(), &[("bar".to_string(), "bar".to_string())]);
}

#[tokio::test]
async fn missing_target_name_is_invalid() {
    let (client, rest) = scripted_rest(Scripted::default());
    let err = rest.create(&Context::default_namespace(), rest.new_object()).await.unwrap_err();
    assert!(err.is_invalid());
    assert!(err.to_string().contains("spec.from.name: required value"), "{err}");
    assert!(client.generated.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_deployment_is_invalid() {
    let (_, rest) = scripted_rest(Scripted::default());
    let err = rest.create(&Context::default_namespace(), rollback("foo")).await.unwrap_err();
    assert_eq!(field_detail(&err), "Deployment not found");
    assert_eq!(err.code(), 422);
}

#[tokio::test]
async fn deployment_lookup_failure_keeps_message() {
    let (_, rest) = scripted_rest(Scripted {
        deployment: Some(Err(Error::StoreUnavailable("connection refused".into()))),
        ..Default::default()
    });
    let err = rest.create(&Context::default_namespace(), rollback("foo")).await.unwrap_err();
    assert_eq!(field_detail(&err), "store unavailable: connection refused");
}

#[tokio::test]
async fn undecodable_snapshot_is_invalid() {
    let (client, rest) = scripted_rest(Scripted {
        deployment: Some(Ok(deployment_of("foo", "bar").tap_annotation("{not json"))),
        ..Default::default()
    });
    let err = rest.create(&Context::default_namespace(), rollback("foo")).await.unwrap_err();
    assert!(field_detail(&err).starts_with("Couldn't decode deploymentConfig from deployment"), "{err}");
    assert!(client.generated.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_live_config_names_it() {
    let (_, rest) = scripted_rest(Scripted { deployment: Some(Ok(deployment_of("foo", "bar"))), ..Default::default() });
    let err = rest.create(&Context::default_namespace(), rollback("foo")).await.unwrap_err();
    assert_eq!(field_detail(&err), "Couldn't find a current deploymentConfig default/bar");
}

#[tokio::test]
async fn live_config_lookup_failure_names_it() {
    let (_, rest) = scripted_rest(Scripted {
        deployment: Some(Ok(deployment_of("foo", "bar"))),
        config: Some(Err(Error::StoreUnavailable("timeout".into()))),
        ..Default::default()
    });
    let err = rest.create(&Context::default_namespace(), rollback("foo")).await.unwrap_err();
    assert_eq!(field_detail(&err), "Error finding current deploymentConfig default/bar: store unavailable: timeout");
}

trait TapAnnotation {
    fn tap_annotation(self, encoded: &str) -> Self;
}

impl TapAnnotation for Deployment {
    fn tap_annotation(mut self, encoded: &str) -> Self {
        self.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(vessel_deploy::util::ENCODED_DEPLOYMENT_CONFIG_ANNOTATION.to_string(), encoded.to_string());
        self
    }
}

fn image_trigger(repository: &str) -> DeploymentTriggerPolicy {
    DeploymentTriggerPolicy {
        type_: DeploymentTriggerType::ImageChange,
        image_change_params: Some(DeploymentTriggerImageChangeParams {
            automatic: true,
            repository_name: repository.into(),
            ..Default::default()
        }),
    }
}

#[tokio::test]
async fn registry_backed_rollback_reverts_replicas() {
    let regs = Registries::new(VersionedStore::new(Arc::new(MemoryBackend::new())), codec());
    let ctx = Context::default_namespace();

    let mut old = config("bar", 1);
    old.template.controller_template.replicas = 1;
    old.triggers = vec![image_trigger("registry/app")];
    let deployed = regs.deployments.create(&ctx, make_deployment(&old, &JsonCodec::default()).unwrap()).await.unwrap();
    assert_eq!(deployed.name(), "bar-1");

    let mut live = old.clone();
    live.latest_version = 2;
    live.template.controller_template.replicas = 5;
    regs.deployment_configs.create(&ctx, live).await.unwrap();

    let client = RegistryGeneratorClient::new(regs.deployments.clone(), regs.deployment_configs.clone());
    let rest = RollbackRest::new(Arc::new(client), codec());
    let mut request = rollback("bar-1");
    request.spec.include_replication_meta = true;
    let candidate = rest.create(&ctx, request).await.unwrap();

    assert_eq!(candidate.name(), "bar");
    assert_eq!(candidate.template.controller_template.replicas, 1);
    assert_eq!(candidate.latest_version, 3);
    assert!(!candidate.triggers[0].image_change_params.as_ref().unwrap().automatic);

    // The candidate is not persisted.
    let stored = regs.deployment_configs.get(&ctx, "bar").await.unwrap();
    assert_eq!(stored.template.controller_template.replicas, 5);
    assert_eq!(stored.latest_version, 2);
}
