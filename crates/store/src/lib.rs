//! Vessel store: key layout, key-value backends and the versioned adapter
//! that every registry goes through.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod backend;
pub mod keys;
pub mod memory;

pub use adapter::{ChangeEvent, ChangeStream, Listing, Precondition, Revision, StoreError, Versioned, VersionedStore};
pub use backend::{Action, BackendError, BackendEvent, CancelHandle, KvBackend, Node, NodeList, WatchStream};
pub use keys::KeyBuilder;
pub use memory::MemoryBackend;

use std::sync::Arc;

/// Adapter over a fresh in-memory backend.
pub fn memory_store() -> VersionedStore {
    VersionedStore::new(Arc::new(MemoryBackend::new()))
}
