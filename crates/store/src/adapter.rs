//! Versioned store adapter.
//!
//! The only component that talks to a [`KvBackend`]. Every backend failure is
//! translated into a [`StoreError`] here; nothing above sees raw backend codes.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tracing::{debug, warn};

use crate::backend::{Action, BackendError, BackendEvent, KvBackend, Node, WatchStream};

/// Opaque store version token.
///
/// Ordered and printable; callers should not rely on it being numeric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(u64);

impl Revision {
    /// "Now" for watches, "unset" elsewhere.
    pub const ZERO: Revision = Revision(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a token previously rendered by `Display`. Empty means zero.
    pub fn parse(token: &str) -> Result<Self, StoreError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(Revision::ZERO);
        }
        token.parse::<u64>().map(Revision).map_err(|_| StoreError::InvalidVersion(token.to_string()))
    }

    /// First revision strictly after this one; zero stays zero.
    pub fn resume_after(self) -> Self {
        if self.is_zero() {
            self
        } else {
            Revision(self.0.saturating_add(1))
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{key} not found")]
    NotFound { key: String },
    #[error("{key} already exists")]
    AlreadyExists { key: String },
    #[error("{key} was modified: expected version {expected}, found {actual}")]
    Conflict { key: String, expected: String, actual: String },
    #[error("version {requested} is too old (oldest retained {oldest})")]
    TooOld { requested: String, oldest: String },
    #[error("invalid version {0:?}")]
    InvalidVersion(String),
    #[error("{0}")]
    Unavailable(String),
}

/// An encoded value and the revision it was last written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: Revision,
}

impl From<Node> for Versioned {
    fn from(n: Node) -> Self {
        Versioned { key: n.key, value: n.value, revision: Revision(n.modified_index) }
    }
}

/// Listed values plus the store revision observed at list time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub items: Vec<Versioned>,
    pub revision: Revision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Overwrite regardless of the stored revision.
    Unconditional,
    /// Only write while the stored revision still equals this one.
    Revision(Revision),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(Versioned),
    Updated(Versioned),
    /// Carries the last value; the revision is that of the delete.
    Deleted(Versioned),
}

impl ChangeEvent {
    pub fn revision(&self) -> Revision {
        self.versioned().revision
    }

    pub fn versioned(&self) -> &Versioned {
        match self {
            ChangeEvent::Created(v) | ChangeEvent::Updated(v) | ChangeEvent::Deleted(v) => v,
        }
    }

    fn from_backend(ev: BackendEvent) -> Self {
        let v = Versioned { key: ev.node.key, value: ev.node.value, revision: Revision(ev.index) };
        match ev.action {
            Action::Create => ChangeEvent::Created(v),
            Action::Set if ev.prev_node.is_none() => ChangeEvent::Created(v),
            Action::Set | Action::CompareAndSwap => ChangeEvent::Updated(v),
            Action::Delete => ChangeEvent::Deleted(v),
        }
    }
}

/// Cancellable stream of change events under a prefix.
pub struct ChangeStream {
    inner: WatchStream,
}

impl ChangeStream {
    /// Next event, or `None` once the stream ends.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.inner.rx.recv().await.map(ChangeEvent::from_backend)
    }

    pub fn cancel(self) {
        self.inner.cancel.cancel();
    }
}

fn interpret(op: &'static str, key: &str, err: BackendError) -> StoreError {
    counter!("store_errors_total", 1u64, "op" => op);
    match err {
        BackendError::KeyNotFound(_) => StoreError::NotFound { key: key.to_string() },
        BackendError::NodeExist(_) => StoreError::AlreadyExists { key: key.to_string() },
        BackendError::TestFailed { expected, actual, .. } => {
            StoreError::Conflict { key: key.to_string(), expected: expected.to_string(), actual: actual.to_string() }
        }
        BackendError::EventIndexCleared { requested, oldest } => {
            StoreError::TooOld { requested: requested.to_string(), oldest: oldest.to_string() }
        }
        BackendError::Unavailable(msg) => {
            warn!(op, key = %key, error = %msg, "store: backend unavailable");
            StoreError::Unavailable(msg)
        }
    }
}

#[derive(Clone)]
pub struct VersionedStore {
    backend: Arc<dyn KvBackend>,
}

impl VersionedStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub async fn get(&self, key: &str) -> Result<Versioned, StoreError> {
        counter!("store_ops_total", 1u64, "op" => "get");
        self.backend.get(key).await.map(Versioned::from).map_err(|e| interpret("get", key, e))
    }

    /// Write only if `key` is absent. Concurrent creators: at most one wins.
    pub async fn create_only(&self, key: &str, value: Vec<u8>) -> Result<Revision, StoreError> {
        counter!("store_ops_total", 1u64, "op" => "create");
        let node = self.backend.create(key, value).await.map_err(|e| interpret("create", key, e))?;
        debug!(key = %key, rev = node.modified_index, "store: created");
        Ok(Revision(node.modified_index))
    }

    pub async fn put(&self, key: &str, value: Vec<u8>, pre: Precondition) -> Result<Revision, StoreError> {
        counter!("store_ops_total", 1u64, "op" => "put");
        let prev_index = match pre {
            Precondition::Unconditional => None,
            Precondition::Revision(r) => Some(r.0),
        };
        let node = self.backend.set(key, value, prev_index).await.map_err(|e| interpret("put", key, e))?;
        debug!(key = %key, rev = node.modified_index, conditional = prev_index.is_some(), "store: put");
        Ok(Revision(node.modified_index))
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        counter!("store_ops_total", 1u64, "op" => "delete");
        self.backend.delete(key).await.map_err(|e| interpret("delete", key, e))?;
        debug!(key = %key, "store: deleted");
        Ok(())
    }

    /// Values beneath `prefix` in store order. Empty collections are not an error.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Listing, StoreError> {
        counter!("store_ops_total", 1u64, "op" => "list");
        let t0 = Instant::now();
        let listed = self.backend.list(prefix).await.map_err(|e| interpret("list", prefix, e))?;
        debug!(prefix = %prefix, count = listed.nodes.len(), took_ms = %t0.elapsed().as_millis(), "store: listed");
        Ok(Listing { items: listed.nodes.into_iter().map(Versioned::from).collect(), revision: Revision(listed.index) })
    }

    /// Events under `prefix` at or after `from`; [`Revision::ZERO`] follows from now on.
    pub async fn watch_prefix(&self, prefix: &str, from: Revision) -> Result<ChangeStream, StoreError> {
        counter!("store_ops_total", 1u64, "op" => "watch");
        let inner = self.backend.watch(prefix, from.0).await.map_err(|e| interpret("watch", prefix, e))?;
        Ok(ChangeStream { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_tokens() {
        assert_eq!(Revision::parse("").unwrap(), Revision::ZERO);
        assert_eq!(Revision::parse("0").unwrap().resume_after(), Revision::ZERO);
        assert_eq!(Revision::parse("7").unwrap().resume_after().to_string(), "8");
        assert!(matches!(Revision::parse("abc"), Err(StoreError::InvalidVersion(_))));
    }

    #[test]
    fn backend_errors_are_classified() {
        assert!(matches!(interpret("get", "/k", BackendError::KeyNotFound("/k".into())), StoreError::NotFound { .. }));
        assert!(matches!(interpret("create", "/k", BackendError::NodeExist("/k".into())), StoreError::AlreadyExists { .. }));
        assert!(matches!(
            interpret("put", "/k", BackendError::TestFailed { key: "/k".into(), expected: 1, actual: 2 }),
            StoreError::Conflict { .. }
        ));
        assert!(matches!(
            interpret("watch", "/k", BackendError::EventIndexCleared { requested: 1, oldest: 5 }),
            StoreError::TooOld { .. }
        ));
        assert!(matches!(interpret("list", "/k", BackendError::Unavailable("down".into())), StoreError::Unavailable(_)));
    }
}
