//! Vessel core types: the object model shared by the store, registries and REST bindings.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ListMeta, ObjectMeta};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod codec;
pub mod error;
pub mod kinds;
pub mod selector;
pub mod validation;

pub use codec::{Codec, CodecError, JsonCodec};
pub use error::{Error, FieldError, FieldErrorType, Result};
pub use selector::Selector;
pub use validation::Validate;

/// Label (and field) sets are plain ordered string maps.
pub type Labels = BTreeMap<String, String>;

/// Namespace used when a request does not name one explicitly.
pub const NAMESPACE_DEFAULT: &str = "default";

/// How `Update` writes an object back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Overwrite whatever is stored. Concurrent writers can lose updates.
    LastWriteWins,
    /// Compare-and-swap against `metadata.resourceVersion` when the caller supplies one.
    Optimistic,
}

/// A stored resource kind.
///
/// Implementors describe where they live in the store (`PATH`), how they are
/// named in messages (`KIND`), and how updates are applied.
pub trait Object: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Kind name, e.g. `Route`.
    const KIND: &'static str;
    /// Store prefix for the collection, e.g. `/routes`.
    const PATH: &'static str;
    /// Item keys require a namespace.
    const NAMESPACED: bool = true;
    const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::LastWriteWins;
    /// REST create may generate a name when the client leaves it empty.
    const GENERATE_NAME: bool = false;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or("")
    }

    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or("")
    }

    fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref().filter(|rv| !rv.is_empty())
    }

    fn label_set(&self) -> Labels {
        self.meta().labels.clone().unwrap_or_default()
    }

    /// Fields addressable by field selectors.
    fn field_set(&self) -> Labels {
        let mut fields = Labels::new();
        fields.insert("name".to_string(), self.name().to_string());
        fields.insert("namespace".to_string(), self.namespace().to_string());
        fields
    }
}

/// A listed collection of one kind, carrying the store index observed at list time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct ObjectList<T> {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<T>,
}

impl<T> ObjectList<T> {
    pub fn new(items: Vec<T>, resource_version: Option<String>) -> Self {
        Self { metadata: ListMeta { resource_version, ..Default::default() }, items }
    }

    pub fn resource_version(&self) -> &str {
        self.metadata.resource_version.as_deref().unwrap_or("")
    }
}

/// Request-scoped context. Today it only carries the namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    namespace: Option<String>,
}

impl Context {
    /// Context without a namespace (cluster-wide listing only).
    pub fn new() -> Self {
        Self { namespace: None }
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        let ns = namespace.into();
        Self { namespace: if ns.is_empty() { None } else { Some(ns) } }
    }

    pub fn default_namespace() -> Self {
        Self::with_namespace(NAMESPACE_DEFAULT)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Fills an empty object namespace from the context.
    ///
    /// Returns `false` when both are set and disagree.
    pub fn adopt_namespace(&self, meta: &mut ObjectMeta) -> bool {
        let obj_ns = meta.namespace.as_deref().unwrap_or("");
        match self.namespace() {
            Some(ns) if obj_ns.is_empty() => {
                meta.namespace = Some(ns.to_string());
                true
            }
            Some(ns) => ns == obj_ns,
            None => true,
        }
    }

    /// Same check as [`Context::adopt_namespace`] without touching the object.
    pub fn namespace_matches(&self, meta: &ObjectMeta) -> bool {
        match (self.namespace(), meta.namespace.as_deref().unwrap_or("")) {
            (Some(ns), obj_ns) if !obj_ns.is_empty() => ns == obj_ns,
            _ => true,
        }
    }
}

pub mod prelude {
    pub use super::kinds::{
        BuildConfig, Deployment, DeploymentConfig, DeploymentConfigRollback, Image, ImageRepository, Route,
    };
    pub use super::{Context, Error, Labels, Object, ObjectList, Result, Selector, UpdatePolicy};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(ns: Option<&str>) -> ObjectMeta {
        ObjectMeta { name: Some("foo".into()), namespace: ns.map(str::to_string), ..Default::default() }
    }

    #[test]
    fn adopt_fills_empty_namespace() {
        let ctx = Context::with_namespace("alfa");
        let mut m = meta(None);
        assert!(ctx.adopt_namespace(&mut m));
        assert_eq!(m.namespace.as_deref(), Some("alfa"));
    }

    #[test]
    fn adopt_rejects_mismatch() {
        let ctx = Context::with_namespace("legal-name");
        let mut m = meta(Some("some-value"));
        assert!(!ctx.adopt_namespace(&mut m));
        assert!(!ctx.namespace_matches(&m));
    }

    #[test]
    fn no_context_namespace_accepts_anything() {
        let ctx = Context::new();
        let mut m = meta(Some("bravo"));
        assert!(ctx.adopt_namespace(&mut m));
        assert_eq!(Context::with_namespace("").namespace(), None);
    }
}
