//! In-process backend: an ordered map plus a bounded event history.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::backend::{
    spawn_watch, watch_buffer, watch_history, Action, BackendError, BackendEvent, EventHistory, KvBackend, Node,
    NodeList, WatchStream,
};

struct State {
    nodes: BTreeMap<String, Node>,
    history: EventHistory,
    index: u64,
}

pub struct MemoryBackend {
    state: Mutex<State>,
    events: broadcast::Sender<BackendEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_history(watch_history())
    }

    pub fn with_history(history: usize) -> Self {
        let (events, _) = broadcast::channel(watch_buffer());
        Self { state: Mutex::new(State { nodes: BTreeMap::new(), history: EventHistory::new(history), index: 0 }), events }
    }

    /// Current global index.
    pub fn index(&self) -> u64 {
        self.lock().map(|s| s.index).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, BackendError> {
        self.state.lock().map_err(|_| BackendError::Unavailable("memory backend lock poisoned".into()))
    }

    /// Record a committed write. Called with the state lock held so events
    /// reach subscribers in index order.
    fn commit(&self, state: &mut State, action: Action, node: Node, prev_node: Option<Node>) {
        let ev = BackendEvent { action, node, prev_node, index: state.index };
        state.history.push(ev.clone());
        let _ = self.events.send(ev);
    }

    fn put_locked(&self, state: &mut State, key: &str, value: Vec<u8>, action: Action) -> Node {
        state.index += 1;
        let index = state.index;
        let prev = state.nodes.get(key).cloned();
        let node = Node {
            key: key.to_string(),
            value,
            created_index: prev.as_ref().map(|p| p.created_index).unwrap_or(index),
            modified_index: index,
        };
        state.nodes.insert(key.to_string(), node.clone());
        self.commit(state, action, node.clone(), prev);
        node
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Node, BackendError> {
        self.lock()?.nodes.get(key).cloned().ok_or_else(|| BackendError::KeyNotFound(key.to_string()))
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<Node, BackendError> {
        // Check and write under one guard so only one creator wins.
        let mut state = self.lock()?;
        if state.nodes.contains_key(key) {
            return Err(BackendError::NodeExist(key.to_string()));
        }
        Ok(self.put_locked(&mut state, key, value, Action::Create))
    }

    async fn set(&self, key: &str, value: Vec<u8>, prev_index: Option<u64>) -> Result<Node, BackendError> {
        let mut state = self.lock()?;
        let Some(expected) = prev_index else {
            return Ok(self.put_locked(&mut state, key, value, Action::Set));
        };
        let actual = match state.nodes.get(key) {
            Some(n) => n.modified_index,
            None => return Err(BackendError::KeyNotFound(key.to_string())),
        };
        if actual != expected {
            return Err(BackendError::TestFailed { key: key.to_string(), expected, actual });
        }
        Ok(self.put_locked(&mut state, key, value, Action::CompareAndSwap))
    }

    async fn delete(&self, key: &str) -> Result<Node, BackendError> {
        let mut state = self.lock()?;
        let Some(mut removed) = state.nodes.remove(key) else {
            return Err(BackendError::KeyNotFound(key.to_string()));
        };
        state.index += 1;
        let prev = removed.clone();
        removed.modified_index = state.index;
        self.commit(&mut state, Action::Delete, removed.clone(), Some(prev));
        Ok(removed)
    }

    async fn list(&self, prefix: &str) -> Result<NodeList, BackendError> {
        let state = self.lock()?;
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let nodes = state
            .nodes
            .range(dir.clone()..)
            .take_while(|(k, _)| k.starts_with(&dir))
            .map(|(_, n)| n.clone())
            .collect();
        Ok(NodeList { nodes, index: state.index })
    }

    async fn watch(&self, prefix: &str, since: u64) -> Result<WatchStream, BackendError> {
        let state = self.lock()?;
        let live = self.events.subscribe();
        let (backlog, next) = if since == 0 {
            (Vec::new(), state.index + 1)
        } else {
            (state.history.since(prefix, since)?, since)
        };
        drop(state);
        Ok(spawn_watch(prefix.to_string(), backlog, live, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_exclusive() {
        let b = MemoryBackend::new();
        let n = b.create("/routes/alfa/foo", b"1".to_vec()).await.unwrap();
        assert_eq!(n.created_index, 1);
        let err = b.create("/routes/alfa/foo", b"2".to_vec()).await.unwrap_err();
        assert_eq!(err, BackendError::NodeExist("/routes/alfa/foo".into()));
        assert_eq!(b.get("/routes/alfa/foo").await.unwrap().value, b"1");
    }

    #[tokio::test]
    async fn compare_and_swap_checks_modified_index() {
        let b = MemoryBackend::new();
        let n = b.create("/k/ns/a", b"1".to_vec()).await.unwrap();
        let n2 = b.set("/k/ns/a", b"2".to_vec(), Some(n.modified_index)).await.unwrap();
        assert_eq!(n2.created_index, n.created_index);
        assert!(n2.modified_index > n.modified_index);
        let err = b.set("/k/ns/a", b"3".to_vec(), Some(n.modified_index)).await.unwrap_err();
        assert!(matches!(err, BackendError::TestFailed { .. }));
        assert!(matches!(b.set("/k/ns/missing", vec![], Some(1)).await, Err(BackendError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn list_is_ordered_and_separator_bound() {
        let b = MemoryBackend::new();
        for key in ["/r/alfa/b", "/r/alfa/a", "/r/alfabet/z", "/r/bravo/a"] {
            b.set(key, key.as_bytes().to_vec(), None).await.unwrap();
        }
        let listed = b.list("/r/alfa").await.unwrap();
        let keys: Vec<_> = listed.nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["/r/alfa/a", "/r/alfa/b"]);
        assert_eq!(listed.index, 4);
        assert_eq!(b.list("/r").await.unwrap().nodes.len(), 4);
        assert!(b.list("/empty").await.unwrap().nodes.is_empty());
        assert_eq!(b.list("/r/bravo/").await.unwrap().nodes[0].key, "/r/bravo/a");
    }

    #[tokio::test]
    async fn watch_replays_from_index_then_follows() {
        let b = MemoryBackend::new();
        b.set("/r/ns/a", b"1".to_vec(), None).await.unwrap();
        b.set("/r/ns/b", b"2".to_vec(), None).await.unwrap();
        let mut w = b.watch("/r/ns", 2).await.unwrap();
        b.delete("/r/ns/a").await.unwrap();
        let first = w.rx.recv().await.unwrap();
        assert_eq!((first.index, first.node.key.as_str()), (2, "/r/ns/b"));
        let second = w.rx.recv().await.unwrap();
        assert_eq!(second.action, Action::Delete);
        assert_eq!(second.node.value, b"1");
        w.cancel.cancel();
    }

    #[tokio::test]
    async fn watch_from_zero_skips_history() {
        let b = MemoryBackend::new();
        b.set("/r/ns/a", b"old".to_vec(), None).await.unwrap();
        let mut w = b.watch("/r/ns", 0).await.unwrap();
        b.set("/r/other/a", b"x".to_vec(), None).await.unwrap();
        b.set("/r/ns/a", b"new".to_vec(), None).await.unwrap();
        let ev = w.rx.recv().await.unwrap();
        assert_eq!(ev.node.value, b"new");
        assert_eq!(ev.prev_node.map(|p| p.value), Some(b"old".to_vec()));
    }

    #[tokio::test]
    async fn watch_before_history_is_cleared() {
        let b = MemoryBackend::with_history(2);
        for i in 0..5u8 {
            b.set("/r/ns/a", vec![i], None).await.unwrap();
        }
        assert!(matches!(b.watch("/r", 1).await, Err(BackendError::EventIndexCleared { .. })));
        assert!(b.watch("/r", 4).await.is_ok());
    }
}
