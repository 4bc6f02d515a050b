//! Per-kind REST binding over a registry.
//!
//! Namespace and validation failures, and deletes of missing objects, are
//! returned directly; mutations that pass them are handed to the async facade.

use chrono::SubsecRound;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Status, Time};
use tracing::{debug, info};
use vessel_core::error::success_status;
use vessel_core::{Context, Error, Object, ObjectList, Result, Selector, Validate};
use vessel_registry::{Registry, StreamHandle, WatchEvent};

use crate::async_op::{make_async, Pending};

pub struct RestStorage<R: Object> {
    registry: Registry<R>,
}

impl<R: Object> Clone for RestStorage<R> {
    fn clone(&self) -> Self {
        Self { registry: self.registry.clone() }
    }
}

impl<R> RestStorage<R>
where
    R: Object + Validate + Default,
{
    pub fn new(registry: Registry<R>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry<R> {
        &self.registry
    }

    /// An empty object of this kind.
    pub fn new_object(&self) -> R {
        R::default()
    }

    pub async fn list(&self, ctx: &Context, label: &Selector, field: &Selector) -> Result<ObjectList<R>> {
        self.registry.list(ctx, label, field).await
    }

    pub async fn get(&self, ctx: &Context, id: &str) -> Result<R> {
        self.registry.get(ctx, id).await
    }

    pub fn create(&self, ctx: &Context, mut obj: R) -> Result<Pending<R>> {
        if !ctx.adopt_namespace(obj.meta_mut()) {
            return Err(Error::namespace_conflict(R::KIND));
        }
        let meta = obj.meta_mut();
        if R::GENERATE_NAME && meta.name.as_deref().unwrap_or("").is_empty() {
            meta.name = Some(uuid::Uuid::new_v4().to_string());
        }
        // Stored timestamps carry whole seconds.
        meta.creation_timestamp.get_or_insert_with(|| Time(chrono::Utc::now().trunc_subsecs(0)));
        meta.uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        let errs = obj.validate();
        if !errs.is_empty() {
            debug!(kind = R::KIND, name = %obj.name(), causes = errs.len(), "api: create rejected");
            return Err(Error::invalid(R::KIND, obj.name(), errs));
        }
        info!(kind = R::KIND, name = %obj.name(), ns = %obj.namespace(), "api: create");
        let registry = self.registry.clone();
        let ctx = ctx.clone();
        Ok(make_async(move || async move { registry.create(&ctx, obj).await }))
    }

    /// Resolves to the object as read back after the write.
    pub fn update(&self, ctx: &Context, mut obj: R) -> Result<Pending<R>> {
        if obj.name().is_empty() {
            return Err(Error::BadRequest("id is unspecified".into()));
        }
        if !ctx.adopt_namespace(obj.meta_mut()) {
            return Err(Error::namespace_conflict(R::KIND));
        }
        let errs = obj.validate_update();
        if !errs.is_empty() {
            return Err(Error::invalid(R::KIND, obj.name(), errs));
        }
        info!(kind = R::KIND, name = %obj.name(), ns = %obj.namespace(), "api: update");
        let registry = self.registry.clone();
        let ctx = ctx.clone();
        Ok(make_async(move || async move {
            let name = obj.name().to_string();
            registry.update(&ctx, obj).await?;
            registry.get(&ctx, &name).await
        }))
    }

    /// A missing object is reported directly; only the removal itself is deferred.
    pub async fn delete(&self, ctx: &Context, id: &str) -> Result<Pending<Status>> {
        self.registry.get(ctx, id).await?;
        info!(kind = R::KIND, name = %id, "api: delete");
        let registry = self.registry.clone();
        let ctx = ctx.clone();
        let id = id.to_string();
        Ok(make_async(move || async move {
            registry.delete(&ctx, &id).await?;
            Ok(success_status())
        }))
    }

    pub async fn watch(
        &self,
        ctx: &Context,
        label: Selector,
        field: Selector,
        resource_version: &str,
    ) -> Result<StreamHandle<WatchEvent<R>>> {
        self.registry.watch(ctx, label, field, resource_version).await
    }
}
