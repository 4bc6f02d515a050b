//! Vessel deployments: config snapshots embedded in deployments, and rollback.

#![forbid(unsafe_code)]

pub mod generator;
pub mod rest;
pub mod util;

pub use generator::RollbackGenerator;
pub use rest::{GeneratorClient, RegistryGeneratorClient, RollbackRest};
pub use util::{decode_deployment_config, encode_deployment_config, latest_deployment_name, make_deployment};
