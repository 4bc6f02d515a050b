use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vessel_core::codec::{decode, encode};
use vessel_core::{Codec, Context, Error, Object, ObjectList, Result, Selector, UpdatePolicy};
use vessel_store::backend::watch_buffer;
use vessel_store::{CancelHandle, ChangeEvent, KeyBuilder, Precondition, Revision, Versioned, VersionedStore};

use crate::interpret::{interpret_codec_error, interpret_store_error, interpret_watch_error};

/// A change delivered by [`Registry::watch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<R> {
    Added(R),
    Modified(R),
    Deleted(R),
}

impl<R> WatchEvent<R> {
    pub fn object(&self) -> &R {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "ADDED",
            WatchEvent::Modified(_) => "MODIFIED",
            WatchEvent::Deleted(_) => "DELETED",
        }
    }
}

/// Stream handle returned by watches. Cancelling stops delivery without an error event.
pub struct StreamHandle<T> {
    pub rx: mpsc::Receiver<T>,
    pub cancel: CancelHandle,
}

/// Store-backed CRUD, list and watch for one kind.
pub struct Registry<R: Object> {
    store: VersionedStore,
    codec: Arc<dyn Codec>,
    keys: KeyBuilder,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Object> Clone for Registry<R> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), codec: Arc::clone(&self.codec), keys: self.keys, _kind: PhantomData }
    }
}

fn observe(kind: &'static str, op: &'static str, t0: Instant) {
    counter!("registry_ops_total", 1u64, "kind" => kind, "op" => op);
    histogram!("registry_op_ms", t0.elapsed().as_secs_f64() * 1000.0, "kind" => kind, "op" => op);
}

impl<R: Object> Registry<R> {
    pub fn new(store: VersionedStore, codec: Arc<dyn Codec>) -> Self {
        Self { store, codec, keys: KeyBuilder::for_kind::<R>(), _kind: PhantomData }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    fn decode_versioned(&self, v: &Versioned) -> Result<R> {
        let mut obj: R = decode(self.codec.as_ref(), &v.value).map_err(|e| interpret_codec_error(e, R::KIND, &v.key))?;
        obj.meta_mut().resource_version = Some(v.revision.to_string());
        Ok(obj)
    }

    /// Encode without the resource version; the store index is authoritative.
    fn encode_object(&self, obj: &mut R) -> Result<Vec<u8>> {
        obj.meta_mut().resource_version = None;
        encode(self.codec.as_ref(), obj).map_err(|e| interpret_codec_error(e, R::KIND, obj.name()))
    }

    /// Objects in the context namespace matching both selectors, in store order.
    ///
    /// A listing is all-or-nothing: one stored entry that fails to decode
    /// fails the call with `Internal`. [`Registry::watch`] skips such entries
    /// instead, since a stream has no single result to fail.
    pub async fn list(&self, ctx: &Context, label: &Selector, field: &Selector) -> Result<ObjectList<R>> {
        let t0 = Instant::now();
        let key = self.keys.list_key(ctx);
        let listing = self.store.list_prefix(&key).await.map_err(|e| interpret_store_error(e, R::KIND, ""))?;
        let mut items = Vec::with_capacity(listing.items.len());
        for v in &listing.items {
            let obj = self.decode_versioned(v)?;
            if label.matches(&obj.label_set()) && field.matches(&obj.field_set()) {
                items.push(obj);
            }
        }
        debug!(kind = R::KIND, key = %key, total = listing.items.len(), matched = items.len(), "registry: list");
        observe(R::KIND, "list", t0);
        Ok(ObjectList::new(items, Some(listing.revision.to_string())))
    }

    pub async fn get(&self, ctx: &Context, name: &str) -> Result<R> {
        let t0 = Instant::now();
        let key = self.keys.item_key(ctx, name)?;
        let v = self.store.get(&key).await.map_err(|e| interpret_store_error(e, R::KIND, name))?;
        let obj = self.decode_versioned(&v)?;
        observe(R::KIND, "get", t0);
        Ok(obj)
    }

    /// Store a new object. Fails with `AlreadyExists` rather than overwriting.
    pub async fn create(&self, ctx: &Context, mut obj: R) -> Result<R> {
        let t0 = Instant::now();
        if !ctx.adopt_namespace(obj.meta_mut()) {
            return Err(Error::namespace_conflict(R::KIND));
        }
        let name = obj.name().to_string();
        let key = self.keys.item_key(ctx, &name)?;
        let data = self.encode_object(&mut obj)?;
        let rev = self.store.create_only(&key, data).await.map_err(|e| interpret_store_error(e, R::KIND, &name))?;
        obj.meta_mut().resource_version = Some(rev.to_string());
        info!(kind = R::KIND, key = %key, rev = %rev, took_ms = %t0.elapsed().as_millis(), "registry: created");
        observe(R::KIND, "create", t0);
        Ok(obj)
    }

    /// Replace an existing object.
    ///
    /// Last-writer-wins kinds check existence then overwrite; a delete landing
    /// between the two is undone. Optimistic kinds compare against the
    /// object's `resourceVersion` when it carries one.
    pub async fn update(&self, ctx: &Context, mut obj: R) -> Result<R> {
        let t0 = Instant::now();
        if !ctx.adopt_namespace(obj.meta_mut()) {
            return Err(Error::namespace_conflict(R::KIND));
        }
        let name = obj.name().to_string();
        let key = self.keys.item_key(ctx, &name)?;
        let expected = match (R::UPDATE_POLICY, obj.resource_version()) {
            (UpdatePolicy::Optimistic, Some(rv)) => {
                Some(Revision::parse(rv).map_err(|e| interpret_store_error(e, R::KIND, &name))?)
            }
            _ => None,
        };
        let pre = match expected {
            Some(rev) => Precondition::Revision(rev),
            None => {
                self.store.get(&key).await.map_err(|e| interpret_store_error(e, R::KIND, &name))?;
                Precondition::Unconditional
            }
        };
        let data = self.encode_object(&mut obj)?;
        let rev = self.store.put(&key, data, pre).await.map_err(|e| interpret_store_error(e, R::KIND, &name))?;
        obj.meta_mut().resource_version = Some(rev.to_string());
        info!(
            kind = R::KIND,
            key = %key,
            rev = %rev,
            conditional = expected.is_some(),
            took_ms = %t0.elapsed().as_millis(),
            "registry: updated"
        );
        observe(R::KIND, "update", t0);
        Ok(obj)
    }

    pub async fn delete(&self, ctx: &Context, name: &str) -> Result<()> {
        let t0 = Instant::now();
        let key = self.keys.item_key(ctx, name)?;
        self.store.delete(&key).await.map_err(|e| interpret_store_error(e, R::KIND, name))?;
        info!(kind = R::KIND, key = %key, took_ms = %t0.elapsed().as_millis(), "registry: deleted");
        observe(R::KIND, "delete", t0);
        Ok(())
    }

    /// Follow changes in the context namespace.
    ///
    /// `resource_version` is a token from a previous list or event: empty or
    /// `"0"` watches from now, anything else resumes strictly after it.
    /// Entries that fail to decode are logged and skipped.
    pub async fn watch(
        &self,
        ctx: &Context,
        label: Selector,
        field: Selector,
        resource_version: &str,
    ) -> Result<StreamHandle<WatchEvent<R>>> {
        let from = Revision::parse(resource_version)
            .map_err(|_| Error::BadRequest(format!("{} watch: invalid resource version {resource_version:?}", R::KIND)))?
            .resume_after();
        let t0 = Instant::now();
        let prefix = self.keys.list_key(ctx);
        let mut stream = self
            .store
            .watch_prefix(&prefix, from)
            .await
            .map_err(|e| interpret_watch_error(e, R::KIND, resource_version))?;
        info!(kind = R::KIND, prefix = %prefix, from = %from, "registry: watch start");
        observe(R::KIND, "watch", t0);

        let (tx, rx) = mpsc::channel::<WatchEvent<R>>(watch_buffer());
        let codec = Arc::clone(&self.codec);
        let task = tokio::spawn(async move {
            loop {
                let ev = tokio::select! {
                    ev = stream.next() => match ev {
                        Some(ev) => ev,
                        None => break,
                    },
                    _ = tx.closed() => break,
                };
                let v = ev.versioned();
                let mut obj: R = match decode(codec.as_ref(), &v.value) {
                    Ok(o) => o,
                    Err(e) => {
                        warn!(kind = R::KIND, key = %v.key, rev = %v.revision, error = %e, "registry: dropping undecodable watch entry");
                        counter!("watch_dropped_total", 1u64, "kind" => R::KIND);
                        continue;
                    }
                };
                obj.meta_mut().resource_version = Some(v.revision.to_string());
                if !label.matches(&obj.label_set()) || !field.matches(&obj.field_set()) {
                    continue;
                }
                let out = match ev {
                    ChangeEvent::Created(_) => WatchEvent::Added(obj),
                    ChangeEvent::Updated(_) => WatchEvent::Modified(obj),
                    ChangeEvent::Deleted(_) => WatchEvent::Deleted(obj),
                };
                if tx.send(out).await.is_err() {
                    break;
                }
            }
            stream.cancel();
            debug!(kind = R::KIND, "registry: watch stop");
        });
        Ok(StreamHandle { rx, cancel: CancelHandle::new(task) })
    }
}
