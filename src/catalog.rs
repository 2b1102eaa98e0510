use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cids (id INTEGER PRIMARY KEY AUTOINCREMENT, cid TEXT NOT NULL);
     CREATE TABLE IF NOT EXISTS counters (name TEXT PRIMARY KEY, value INTEGER NOT NULL);";

/// The persistent CID catalog and counters store. The real deployment backs
/// this with a hosted document store (streaming reads, atomic-increment,
/// document add, batch delete); here it is a thin rusqlite adapter exposing
/// the same four operations. Each call is dispatched through
/// `spawn_blocking` since rusqlite's `Connection` is synchronous and must
/// not block the async runtime's worker threads.
#[derive(Clone)]
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            f(&conn)
        })
        .await
        .map_err(|e| AppError::CatalogFailure(format!("catalog task panicked: {e}")))?
        .map_err(AppError::from)
    }

    /// Streams all CID documents currently in the catalog.
    pub async fn stream_cids(&self) -> Result<Vec<String>, AppError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT cid FROM cids ORDER BY id")?;
            stmt.query_map([], |row| row.get::<_, String>(0))?.collect()
        })
        .await
    }

    /// Appends a single `{cid}` document to the catalog.
    pub async fn append_cid(&self, cid: &str) -> Result<(), AppError> {
        let cid = cid.to_string();
        self.blocking(move |conn| {
            conn.execute("INSERT INTO cids (cid) VALUES (?1)", [&cid])?;
            Ok(())
        })
        .await
    }

    /// Atomically increments a named counter, creating it with the given
    /// delta as its initial value if absent.
    pub async fn increment_counter(&self, name: &str, delta: i64) -> Result<(), AppError> {
        if delta == 0 {
            return Ok(());
        }
        let name = name.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO counters (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = value + excluded.value",
                rusqlite::params![name, delta],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn counter_value(&self, name: &str) -> Result<i64, AppError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            let value = conn
                .query_row("SELECT value FROM counters WHERE name = ?1", [&name], |row| row.get(0))
                .unwrap_or(0);
            Ok(value)
        })
        .await
    }

    /// Streams all CID documents and deletes them in a single batch.
    pub async fn clear_cids(&self) -> Result<(), AppError> {
        self.blocking(|conn| {
            conn.execute("DELETE FROM cids", [])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_stream_round_trips() {
        let store = CatalogStore::in_memory().unwrap();
        store.append_cid("bafy1").await.unwrap();
        store.append_cid("bafy2").await.unwrap();
        let cids = store.stream_cids().await.unwrap();
        assert_eq!(cids, vec!["bafy1".to_string(), "bafy2".to_string()]);
    }

    #[tokio::test]
    async fn clear_empties_catalog() {
        let store = CatalogStore::in_memory().unwrap();
        store.append_cid("bafy1").await.unwrap();
        store.clear_cids().await.unwrap();
        assert!(store.stream_cids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counter_increments_and_creates_on_first_use() {
        let store = CatalogStore::in_memory().unwrap();
        store.increment_counter("total_requests", 5).await.unwrap();
        store.increment_counter("total_requests", 3).await.unwrap();
        assert_eq!(store.counter_value("total_requests").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn data_persists_across_reopening_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        let store = CatalogStore::open(&path).unwrap();
        store.append_cid("bafy1").await.unwrap();
        store.increment_counter("total_requests", 2).await.unwrap();
        drop(store);

        let reopened = CatalogStore::open(&path).unwrap();
        assert_eq!(reopened.stream_cids().await.unwrap(), vec!["bafy1".to_string()]);
        assert_eq!(reopened.counter_value("total_requests").await.unwrap(), 2);
    }
}
