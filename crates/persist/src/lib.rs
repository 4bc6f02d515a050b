//! Vessel persistence: SQLite-backed key-value backend.
//! Same contract as the in-memory backend, but survives restarts.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use rusqlite::{Connection, OptionalExtension, Transaction};
use tokio::sync::broadcast;
use tracing::info;
use vessel_store::backend::{spawn_watch, watch_buffer, watch_history};
use vessel_store::{Action, BackendError, BackendEvent, KvBackend, Node, NodeList, WatchStream};

/// SQLite-backed backend. Simple and synchronous: every call takes the
/// connection lock for the duration of one statement batch.
pub struct SqliteBackend {
    db: Mutex<Connection>,
    events: broadcast::Sender<BackendEvent>,
    history: usize,
}

fn unavailable(e: rusqlite::Error) -> BackendError {
    counter!("persist_errors_total", 1u64);
    BackendError::Unavailable(format!("sqlite: {e}"))
}

impl SqliteBackend {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("VESSEL_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_history(path, watch_history())
    }

    /// Open (or create) the database at `path`, retaining `history` change
    /// events for watch resumption.
    pub fn open_with_history(path: &str, history: usize) -> Result<Self> {
        let started = Instant::now();
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                key            TEXT PRIMARY KEY,
                value          BLOB NOT NULL,
                created_index  INTEGER NOT NULL,
                modified_index INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS changes (
                idx            INTEGER PRIMARY KEY,
                action         TEXT NOT NULL,
                key            TEXT NOT NULL,
                value          BLOB NOT NULL,
                created_index  INTEGER NOT NULL,
                prev_value     BLOB,
                prev_created   INTEGER,
                prev_modified  INTEGER
            );
            CREATE TABLE IF NOT EXISTS meta (
                name  TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );",
        )
        .context("creating vessel tables")?;
        let index = current_index(&db).context("reading store index")?;
        let (events, _) = broadcast::channel(watch_buffer());
        let me = Self { db: Mutex::new(db), events, history: history.max(1) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path = %path, index, "persist: sqlite backend open");
        Ok(me)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, BackendError> {
        self.db.lock().map_err(|_| BackendError::Unavailable("sqlite connection lock poisoned".into()))
    }

    /// Apply one write in a transaction. `check` sees the stored node and may
    /// veto the write. `value == None` deletes.
    fn apply(
        &self,
        key: &str,
        action: Action,
        value: Option<Vec<u8>>,
        check: impl FnOnce(Option<&Node>) -> Result<(), BackendError>,
    ) -> Result<Node, BackendError> {
        let started = Instant::now();
        let mut db = self.lock()?;
        let tx = db.transaction().map_err(unavailable)?;
        let prev = read_node(&tx, key).map_err(unavailable)?;
        check(prev.as_ref())?;
        let index = current_index(&tx).map_err(unavailable)? + 1;
        let node = match value {
            Some(value) => {
                let node = Node {
                    key: key.to_string(),
                    value,
                    created_index: prev.as_ref().map(|p| p.created_index).unwrap_or(index),
                    modified_index: index,
                };
                tx.execute(
                    "INSERT INTO nodes(key, value, created_index, modified_index) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, modified_index = excluded.modified_index",
                    (&node.key, &node.value, node.created_index as i64, index as i64),
                )
                .map_err(unavailable)?;
                node
            }
            None => {
                let Some(mut removed) = prev.clone() else {
                    return Err(BackendError::KeyNotFound(key.to_string()));
                };
                tx.execute("DELETE FROM nodes WHERE key = ?1", [key]).map_err(unavailable)?;
                removed.modified_index = index;
                removed
            }
        };
        tx.execute("INSERT OR REPLACE INTO meta(name, value) VALUES ('index', ?1)", [index as i64])
            .map_err(unavailable)?;
        tx.execute(
            "INSERT INTO changes(idx, action, key, value, created_index, prev_value, prev_created, prev_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            (
                index as i64,
                action.as_str(),
                &node.key,
                &node.value,
                node.created_index as i64,
                prev.as_ref().map(|p| p.value.clone()),
                prev.as_ref().map(|p| p.created_index as i64),
                prev.as_ref().map(|p| p.modified_index as i64),
            ),
        )
        .map_err(unavailable)?;
        // Keep the latest `history` change rows.
        tx.execute("DELETE FROM changes WHERE idx <= ?1", [index as i64 - self.history as i64])
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;
        // Still under the connection lock, so subscribers see index order.
        let _ = self.events.send(BackendEvent { action, node: node.clone(), prev_node: prev, index });
        drop(db);
        histogram!("persist_write_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_write_total", 1u64, "action" => action.as_str());
        Ok(node)
    }
}

fn read_node(conn: &Connection, key: &str) -> rusqlite::Result<Option<Node>> {
    conn.query_row(
        "SELECT value, created_index, modified_index FROM nodes WHERE key = ?1",
        [key],
        |row| {
            Ok(Node {
                key: key.to_string(),
                value: row.get(0)?,
                created_index: row.get::<_, i64>(1)? as u64,
                modified_index: row.get::<_, i64>(2)? as u64,
            })
        },
    )
    .optional()
}

fn current_index(conn: &Connection) -> rusqlite::Result<u64> {
    let v: Option<i64> =
        conn.query_row("SELECT value FROM meta WHERE name = 'index'", [], |row| row.get(0)).optional()?;
    Ok(v.unwrap_or(0) as u64)
}

/// Oldest replayable index; one past the current index when nothing is retained.
fn first_available(tx: &Transaction<'_>, index: u64) -> rusqlite::Result<u64> {
    let min: Option<i64> = tx.query_row("SELECT MIN(idx) FROM changes", [], |row| row.get(0))?;
    Ok(min.map(|m| m as u64).unwrap_or(index + 1))
}

fn changes_since(conn: &Connection, since: u64) -> rusqlite::Result<Vec<BackendEvent>> {
    let mut stmt = conn.prepare(
        "SELECT idx, action, key, value, created_index, prev_value, prev_created, prev_modified
         FROM changes WHERE idx >= ?1 ORDER BY idx",
    )?;
    let mut rows = stmt.query([since as i64])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let index = row.get::<_, i64>(0)? as u64;
        let action: String = row.get(1)?;
        let key: String = row.get(2)?;
        let prev_value: Option<Vec<u8>> = row.get(5)?;
        let prev_node = match prev_value {
            Some(value) => Some(Node {
                key: key.clone(),
                value,
                created_index: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as u64,
                modified_index: row.get::<_, Option<i64>>(7)?.unwrap_or(0) as u64,
            }),
            None => None,
        };
        out.push(BackendEvent {
            action: Action::parse(&action).unwrap_or(Action::Set),
            node: Node {
                key,
                value: row.get(3)?,
                created_index: row.get::<_, i64>(4)? as u64,
                modified_index: index,
            },
            prev_node,
            index,
        });
    }
    Ok(out)
}

#[async_trait::async_trait]
impl KvBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Node, BackendError> {
        let started = Instant::now();
        let db = self.lock()?;
        let node = read_node(&db, key).map_err(unavailable)?;
        drop(db);
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        node.ok_or_else(|| BackendError::KeyNotFound(key.to_string()))
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<Node, BackendError> {
        self.apply(key, Action::Create, Some(value), |prev| match prev {
            Some(_) => Err(BackendError::NodeExist(key.to_string())),
            None => Ok(()),
        })
    }

    async fn set(&self, key: &str, value: Vec<u8>, prev_index: Option<u64>) -> Result<Node, BackendError> {
        let Some(expected) = prev_index else {
            return self.apply(key, Action::Set, Some(value), |_| Ok(()));
        };
        self.apply(key, Action::CompareAndSwap, Some(value), |prev| match prev {
            None => Err(BackendError::KeyNotFound(key.to_string())),
            Some(n) if n.modified_index != expected => {
                Err(BackendError::TestFailed { key: key.to_string(), expected, actual: n.modified_index })
            }
            Some(_) => Ok(()),
        })
    }

    async fn delete(&self, key: &str) -> Result<Node, BackendError> {
        self.apply(key, Action::Delete, None, |prev| match prev {
            None => Err(BackendError::KeyNotFound(key.to_string())),
            Some(_) => Ok(()),
        })
    }

    async fn list(&self, prefix: &str) -> Result<NodeList, BackendError> {
        let started = Instant::now();
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        // Every key starting with "<dir>" sorts in ["<prefix>/", "<prefix>0").
        let upper = format!("{}0", prefix.trim_end_matches('/'));
        let db = self.lock()?;
        let index = current_index(&db).map_err(unavailable)?;
        let mut stmt = db
            .prepare(
                "SELECT key, value, created_index, modified_index FROM nodes
                 WHERE key >= ?1 AND key < ?2 ORDER BY key",
            )
            .map_err(unavailable)?;
        let nodes = stmt
            .query_map((&dir, &upper), |row| {
                Ok(Node {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    created_index: row.get::<_, i64>(2)? as u64,
                    modified_index: row.get::<_, i64>(3)? as u64,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(unavailable)?;
        drop(stmt);
        drop(db);
        histogram!("persist_list_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(NodeList { nodes, index })
    }

    async fn watch(&self, prefix: &str, since: u64) -> Result<WatchStream, BackendError> {
        let mut db = self.lock()?;
        let live = self.events.subscribe();
        let tx = db.transaction().map_err(unavailable)?;
        let index = current_index(&tx).map_err(unavailable)?;
        let (backlog, next) = if since == 0 {
            (Vec::new(), index + 1)
        } else {
            let oldest = first_available(&tx, index).map_err(unavailable)?;
            if since < oldest {
                return Err(BackendError::EventIndexCleared { requested: since, oldest });
            }
            let backlog = changes_since(&tx, since)
                .map_err(unavailable)?
                .into_iter()
                .filter(|e| vessel_store::keys::in_prefix(&e.node.key, prefix))
                .collect();
            (backlog, since)
        };
        tx.commit().map_err(unavailable)?;
        drop(db);
        Ok(spawn_watch(prefix.to_string(), backlog, live, next))
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".vessel");
        let _ = std::fs::create_dir_all(&p);
        p.push("vessel.db");
        return p.to_string_lossy().to_string();
    }
    "vessel.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!(
            "vessel-test-{}.db",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        );
        dir.join(f).to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn create_get_list_delete() {
        let b = SqliteBackend::open(&temp_db()).unwrap();
        b.create("/routes/alfa/b", b"b".to_vec()).await.unwrap();
        b.create("/routes/alfa/a", b"a".to_vec()).await.unwrap();
        b.create("/routes/alfabet/z", b"z".to_vec()).await.unwrap();
        assert_eq!(b.create("/routes/alfa/a", vec![]).await.unwrap_err(), BackendError::NodeExist("/routes/alfa/a".into()));

        let listed = b.list("/routes/alfa").await.unwrap();
        let keys: Vec<_> = listed.nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["/routes/alfa/a", "/routes/alfa/b"]);
        assert_eq!(listed.index, 3);

        let removed = b.delete("/routes/alfa/a").await.unwrap();
        assert_eq!(removed.value, b"a");
        assert!(matches!(b.get("/routes/alfa/a").await, Err(BackendError::KeyNotFound(_))));
        assert!(matches!(b.delete("/routes/alfa/a").await, Err(BackendError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn compare_and_swap() {
        let b = SqliteBackend::open(&temp_db()).unwrap();
        let n = b.create("/k/ns/a", b"1".to_vec()).await.unwrap();
        let n2 = b.set("/k/ns/a", b"2".to_vec(), Some(n.modified_index)).await.unwrap();
        assert_eq!(n2.created_index, n.created_index);
        let err = b.set("/k/ns/a", b"3".to_vec(), Some(n.modified_index)).await.unwrap_err();
        assert_eq!(err, BackendError::TestFailed { key: "/k/ns/a".into(), expected: n.modified_index, actual: n2.modified_index });
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = temp_db();
        {
            let b = SqliteBackend::open(&path).unwrap();
            b.create("/images/ns/a", b"a".to_vec()).await.unwrap();
            b.set("/images/ns/a", b"a2".to_vec(), None).await.unwrap();
        }
        let b = SqliteBackend::open(&path).unwrap();
        let n = b.get("/images/ns/a").await.unwrap();
        assert_eq!((n.value.as_slice(), n.created_index, n.modified_index), (&b"a2"[..], 1, 2));
        let next = b.create("/images/ns/b", vec![]).await.unwrap();
        assert_eq!(next.modified_index, 3);

        let mut w = b.watch("/images/ns", 2).await.unwrap();
        let first = w.rx.recv().await.unwrap();
        assert_eq!(first.index, 2);
        assert_eq!(first.prev_node.map(|p| p.value), Some(b"a".to_vec()));
        assert_eq!(w.rx.recv().await.unwrap().action, Action::Create);
    }

    #[tokio::test]
    async fn change_log_is_pruned() {
        let b = SqliteBackend::open_with_history(&temp_db(), 3).unwrap();
        for i in 0..6u8 {
            b.set("/r/ns/a", vec![i], None).await.unwrap();
        }
        assert!(matches!(b.watch("/r", 3).await, Err(BackendError::EventIndexCleared { requested: 3, oldest: 4 })));
        let mut w = b.watch("/r", 4).await.unwrap();
        let got: Vec<u8> = vec![
            w.rx.recv().await.unwrap().node.value[0],
            w.rx.recv().await.unwrap().node.value[0],
            w.rx.recv().await.unwrap().node.value[0],
        ];
        assert_eq!(got, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn live_writes_reach_watchers() {
        let b = SqliteBackend::open(&temp_db()).unwrap();
        b.create("/r/ns/old", vec![]).await.unwrap();
        let mut w = b.watch("/r/ns", 0).await.unwrap();
        b.create("/r/elsewhere/x", vec![]).await.unwrap();
        b.delete("/r/ns/old").await.unwrap();
        let ev = w.rx.recv().await.unwrap();
        assert_eq!((ev.action, ev.node.key.as_str()), (Action::Delete, "/r/ns/old"));
    }
}
