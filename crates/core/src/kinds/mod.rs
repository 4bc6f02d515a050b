//! The managed resource kinds.

mod build;
mod deploy;
mod image;
mod route;

pub use build::{BuildConfig, BuildInput, StiBuildInput};
pub use deploy::{
    ControllerTemplate, CustomDeploymentStrategyParams, Deployment, DeploymentConfig, DeploymentConfigRollback,
    DeploymentConfigRollbackSpec, DeploymentStatus, DeploymentStrategy, DeploymentStrategyType, DeploymentTemplate,
    DeploymentTriggerImageChangeParams, DeploymentTriggerPolicy, DeploymentTriggerType,
};
pub use image::{Image, ImageRepository, ImageRepositoryStatus};
pub use route::Route;
