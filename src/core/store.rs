//! Latest-snapshot cache: one JSON row per service in SQLite.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::models::usage::ServiceUsage;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to prepare store directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A cached record together with the refresh that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub usage: ServiceUsage,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("snapshot store at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                service TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Overwrite the row for `usage.service`.
    pub async fn put(&self, usage: &ServiceUsage, updated_at: &str) -> Result<(), StoreError> {
        let data = serde_json::to_string(usage)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO snapshots (service, data, updated_at) VALUES (?1, ?2, ?3)",
            params![usage.service, data, updated_at],
        )?;
        debug!("stored {} snapshot", usage.service);
        Ok(())
    }

    /// Overwrite several rows in one transaction, all stamped `updated_at`.
    pub async fn put_all(&self, usages: &[ServiceUsage], updated_at: &str) -> Result<(), StoreError> {
        let rows = usages
            .iter()
            .map(|u| Ok((u.service.as_str(), serde_json::to_string(u)?)))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO snapshots (service, data, updated_at) VALUES (?1, ?2, ?3)",
            )?;
            for (service, data) in &rows {
                stmt.execute(params![service, data, updated_at])?;
            }
        }
        tx.commit()?;
        debug!("stored {} snapshots", rows.len());
        Ok(())
    }

    /// Cached snapshot for `service`. Undecodable rows read as absent.
    pub async fn get(&self, service: &str) -> Result<Option<Snapshot>, StoreError> {
        let conn = self.conn.lock().await;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT data, updated_at FROM snapshots WHERE service = ?1",
                params![service],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(data, updated_at)| decode(service, &data, updated_at)))
    }

    /// Every cached snapshot, ordered by service name.
    pub async fn all(&self) -> Result<Vec<Snapshot>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT service, data, updated_at FROM snapshots ORDER BY service")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (service, data, updated_at) = row?;
            if let Some(snapshot) = decode(&service, &data, updated_at) {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Close the connection if this is the last handle to it.
    pub fn close(self) -> Result<(), StoreError> {
        match Arc::try_unwrap(self.conn) {
            Ok(conn) => conn.into_inner().close().map_err(|(_, e)| StoreError::Sqlite(e)),
            Err(_) => {
                debug!("store still shared; leaving connection open");
                Ok(())
            }
        }
    }
}

fn decode(service: &str, data: &str, updated_at: String) -> Option<Snapshot> {
    match serde_json::from_str::<ServiceUsage>(data) {
        Ok(usage) => Some(Snapshot { usage, updated_at }),
        Err(e) => {
            warn!("ignoring undecodable {} snapshot: {}", service, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::usage::DailyUsage;

    fn usage(service: &str, total_tokens: u64) -> ServiceUsage {
        let mut u = ServiceUsage::empty(service);
        u.total_tokens = total_tokens;
        u.set_daily([DailyUsage::new("2026-01-02")]);
        u
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = SnapshotStore::open_in_memory().unwrap();
        store.put(&usage("codex", 42), "2026-01-02T00:00:00Z").await.unwrap();

        let snapshot = store.get("codex").await.unwrap().unwrap();
        assert_eq!(snapshot.usage, usage("codex", 42));
        assert_eq!(snapshot.updated_at, "2026-01-02T00:00:00Z");
        assert!(store.get("claude").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_row() {
        let store = SnapshotStore::open_in_memory().unwrap();
        store.put(&usage("claude", 1), "t1").await.unwrap();
        store.put(&usage("claude", 2), "t2").await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let snapshot = store.get("claude").await.unwrap().unwrap();
        assert_eq!(snapshot.usage.total_tokens, 2);
        assert_eq!(snapshot.updated_at, "t2");
    }

    #[tokio::test]
    async fn put_all_shares_timestamp() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let batch = vec![usage("codex", 1), usage("antigravity", 2), usage("claude", 3)];
        store.put_all(&batch, "2026-05-01T12:00:00Z").await.unwrap();

        let all = store.all().await.unwrap();
        let services: Vec<&str> = all.iter().map(|s| s.usage.service.as_str()).collect();
        assert_eq!(services, vec!["antigravity", "claude", "codex"]);
        assert!(all.iter().all(|s| s.updated_at == "2026-05-01T12:00:00Z"));
    }

    #[tokio::test]
    async fn corrupt_rows_read_as_missing() {
        let store = SnapshotStore::open_in_memory().unwrap();
        store.put(&usage("codex", 1), "t").await.unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO snapshots (service, data, updated_at) VALUES ('claude', '{oops', 't')",
                [],
            )
            .unwrap();
        }
        assert!(store.get("claude").await.unwrap().is_none());
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_creates_parent_dirs_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("usage.db");
        let store = SnapshotStore::open(&path).unwrap();
        store.put(&usage("codex", 7), "t").await.unwrap();
        store.close().unwrap();

        let reopened = SnapshotStore::open(&path).unwrap();
        assert_eq!(reopened.get("codex").await.unwrap().unwrap().usage.total_tokens, 7);
    }
}
