//! Vessel registries: one generic store-backed registry per resource kind.

#![forbid(unsafe_code)]

use std::sync::Arc;

use vessel_core::kinds::{BuildConfig, Deployment, DeploymentConfig, Image, ImageRepository, Route};
use vessel_core::Codec;
use vessel_store::VersionedStore;

pub mod interpret;
mod registry;

pub use registry::{Registry, StreamHandle, WatchEvent};

/// Every registry this system serves, built over one store and codec.
#[derive(Clone)]
pub struct Registries {
    pub routes: Registry<Route>,
    pub build_configs: Registry<BuildConfig>,
    pub deployments: Registry<Deployment>,
    pub deployment_configs: Registry<DeploymentConfig>,
    pub images: Registry<Image>,
    pub image_repositories: Registry<ImageRepository>,
}

impl Registries {
    pub fn new(store: VersionedStore, codec: Arc<dyn Codec>) -> Self {
        Self {
            routes: Registry::new(store.clone(), Arc::clone(&codec)),
            build_configs: Registry::new(store.clone(), Arc::clone(&codec)),
            deployments: Registry::new(store.clone(), Arc::clone(&codec)),
            deployment_configs: Registry::new(store.clone(), Arc::clone(&codec)),
            images: Registry::new(store.clone(), Arc::clone(&codec)),
            image_repositories: Registry::new(store, codec),
        }
    }
}
