//! Vessel request-facing API: the async operation facade and per-kind REST bindings.

#![forbid(unsafe_code)]

use vessel_core::kinds::{BuildConfig, Deployment, DeploymentConfig, Image, ImageRepository, Route};
use vessel_registry::Registries;

pub mod async_op;
pub mod rest;

pub use async_op::{make_async, OperationResult, Pending};
pub use rest::RestStorage;

/// REST bindings for every served kind.
#[derive(Clone)]
pub struct RestApi {
    pub routes: RestStorage<Route>,
    pub build_configs: RestStorage<BuildConfig>,
    pub deployments: RestStorage<Deployment>,
    pub deployment_configs: RestStorage<DeploymentConfig>,
    pub images: RestStorage<Image>,
    pub image_repositories: RestStorage<ImageRepository>,
}

impl RestApi {
    pub fn new(registries: &Registries) -> Self {
        Self {
            routes: RestStorage::new(registries.routes.clone()),
            build_configs: RestStorage::new(registries.build_configs.clone()),
            deployments: RestStorage::new(registries.deployments.clone()),
            deployment_configs: RestStorage::new(registries.deployment_configs.clone()),
            images: RestStorage::new(registries.images.clone()),
            image_repositories: RestStorage::new(registries.image_repositories.clone()),
        }
    }
}
