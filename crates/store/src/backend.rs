//! Raw key-value backend contract.
//!
//! Modeled on a hierarchical etcd-v2 style store: opaque byte values, a
//! single global index advanced by every successful write, per-node
//! created/modified indexes, and prefix watches resumable from an index.

use std::collections::VecDeque;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::keys::in_prefix;

pub const DEFAULT_WATCH_BUFFER: usize = 1024;
pub const DEFAULT_WATCH_HISTORY: usize = 1000;

/// Capacity of each watch stream channel (`VESSEL_WATCH_BUFFER`).
pub fn watch_buffer() -> usize {
    std::env::var("VESSEL_WATCH_BUFFER").ok().and_then(|s| s.parse().ok()).filter(|n| *n > 0).unwrap_or(DEFAULT_WATCH_BUFFER)
}

/// Number of change events kept for resumption (`VESSEL_WATCH_HISTORY`).
pub fn watch_history() -> usize {
    std::env::var("VESSEL_WATCH_HISTORY").ok().and_then(|s| s.parse().ok()).filter(|n| *n > 0).unwrap_or(DEFAULT_WATCH_HISTORY)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: String,
    pub value: Vec<u8>,
    pub created_index: u64,
    pub modified_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Set,
    CompareAndSwap,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Set => "set",
            Action::CompareAndSwap => "compareAndSwap",
            Action::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Action::Create),
            "set" => Some(Action::Set),
            "compareAndSwap" => Some(Action::CompareAndSwap),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }
}

/// One committed write. For deletes `node` holds the removed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    pub action: Action,
    pub node: Node,
    pub prev_node: Option<Node>,
    pub index: u64,
}

/// Nodes under a prefix plus the global index at list time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeList {
    pub nodes: Vec<Node>,
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("compare failed on {key}: [{expected} != {actual}]")]
    TestFailed { key: String, expected: u64, actual: u64 },
    #[error("key already exists: {0}")]
    NodeExist(String),
    #[error("the event in requested index {requested} is outdated and cleared (the oldest retained index is {oldest})")]
    EventIndexCleared { requested: u64, oldest: u64 },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// etcd-v2 error code; 0 for transport failures.
    pub fn code(&self) -> u32 {
        match self {
            BackendError::KeyNotFound(_) => 100,
            BackendError::TestFailed { .. } => 101,
            BackendError::NodeExist(_) => 105,
            BackendError::EventIndexCleared { .. } => 401,
            BackendError::Unavailable(_) => 0,
        }
    }
}

/// Owns a feeding task. Cancelling or dropping the handle aborts the task.
pub struct CancelHandle {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CancelHandle {
    pub fn new(task: tokio::task::JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn cancel(mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

/// Live watch over a prefix. Dropping either half ends the feeding task.
pub struct WatchStream {
    pub rx: mpsc::Receiver<BackendEvent>,
    pub cancel: CancelHandle,
}

#[async_trait::async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Node, BackendError>;

    /// Write `value` only if `key` is absent.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<Node, BackendError>;

    /// Write `value`; with `prev_index` the write only succeeds while the
    /// node's modified index still equals it.
    async fn set(&self, key: &str, value: Vec<u8>, prev_index: Option<u64>) -> Result<Node, BackendError>;

    async fn delete(&self, key: &str) -> Result<Node, BackendError>;

    /// All nodes beneath `prefix` in key order. An empty prefix is not an error.
    async fn list(&self, prefix: &str) -> Result<NodeList, BackendError>;

    /// Events under `prefix` with index `>= since`; `since == 0` means only
    /// writes committed after the call.
    async fn watch(&self, prefix: &str, since: u64) -> Result<WatchStream, BackendError>;
}

/// Bounded in-process change history shared by backends for watch resumption.
#[derive(Debug)]
pub struct EventHistory {
    events: VecDeque<BackendEvent>,
    cap: usize,
    /// Smallest index that can still be replayed.
    first_available: u64,
}

impl EventHistory {
    pub fn new(cap: usize) -> Self {
        Self { events: VecDeque::with_capacity(cap.min(4096)), cap: cap.max(1), first_available: 1 }
    }

    pub fn push(&mut self, event: BackendEvent) {
        if self.events.len() >= self.cap {
            if let Some(old) = self.events.pop_front() {
                self.first_available = old.index + 1;
            }
        }
        self.events.push_back(event);
    }

    pub fn first_available(&self) -> u64 {
        self.first_available
    }

    /// Retained events under `prefix` with index `>= since`.
    pub fn since(&self, prefix: &str, since: u64) -> Result<Vec<BackendEvent>, BackendError> {
        if since < self.first_available {
            return Err(BackendError::EventIndexCleared { requested: since, oldest: self.first_available });
        }
        Ok(self.events.iter().filter(|e| e.index >= since && in_prefix(&e.node.key, prefix)).cloned().collect())
    }
}

/// Feed a watch stream: replay `backlog`, then follow `live` from `next_index` on.
///
/// The caller must subscribe to `live` before collecting `backlog` so no
/// committed write falls between the two.
pub fn spawn_watch(
    prefix: String,
    backlog: Vec<BackendEvent>,
    mut live: broadcast::Receiver<BackendEvent>,
    mut next_index: u64,
) -> WatchStream {
    let (tx, rx) = mpsc::channel::<BackendEvent>(watch_buffer());
    let task = tokio::spawn(async move {
        debug!(prefix = %prefix, backlog = backlog.len(), from = next_index, "store: watch start");
        for ev in backlog {
            next_index = ev.index + 1;
            if tx.send(ev).await.is_err() {
                return;
            }
        }
        loop {
            let next = tokio::select! {
                next = live.recv() => next,
                _ = tx.closed() => break,
            };
            match next {
                Ok(ev) => {
                    if ev.index < next_index || !in_prefix(&ev.node.key, &prefix) {
                        continue;
                    }
                    next_index = ev.index + 1;
                    if tx.send(ev).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(prefix = %prefix, skipped = n, "store: watcher fell behind; closing stream");
                    metrics::counter!("watch_lagged_total", 1u64);
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!(prefix = %prefix, "store: watch stop");
    });
    WatchStream { rx, cancel: CancelHandle::new(task) }
}
