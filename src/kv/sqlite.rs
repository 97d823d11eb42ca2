//! SQLite-backed key-value store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required. Several stores can share one database file, each
//! under its own namespace. Expired rows are filtered on read and purged
//! on write.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use super::KeyValueStore;
use crate::clock::{Clock, SystemClock};

/// Key-value store backed by a SQLite database file.
pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
    namespace: String,
    clock: Arc<dyn Clock>,
}

impl SqliteKeyValueStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str, namespace: &str) -> anyhow::Result<Self> {
        Self::with_clock(path, namespace, Arc::new(SystemClock))
    }

    pub fn with_clock(path: &str, namespace: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
            clock,
        };
        store.init_db()?;
        Ok(store)
    }

    /// Idempotent: safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS kv_entries (
                namespace   TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT,
                expires_at  INTEGER,
                PRIMARY KEY (namespace, key)
            );

            CREATE INDEX IF NOT EXISTS idx_kv_entries_expires
                ON kv_entries(expires_at);
            ",
        )?;
        Ok(())
    }

    fn write(&self, key: &str, value: Option<&str>, ttl: Option<Duration>) -> anyhow::Result<()> {
        let now = self.clock.now_millis();
        let expires_at = ttl.map(|ttl| now + ttl.as_millis() as i64);
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute(
            "DELETE FROM kv_entries WHERE namespace = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![self.namespace, now],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (namespace, key, value, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![self.namespace, key, value, expires_at],
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let now = self.clock.now_millis();
            let conn = self.conn.lock().expect("mutex poisoned");
            let value: Option<Option<String>> = conn
                .query_row(
                    "SELECT value FROM kv_entries
                     WHERE namespace = ?1 AND key = ?2
                       AND (expires_at IS NULL OR expires_at > ?3)",
                    params![self.namespace, key, now],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.flatten())
        })
    }

    fn put(
        &self,
        key: &str,
        value: Option<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { self.write(&key, value.as_deref(), None) })
    }

    fn put_with_ttl(
        &self,
        key: &str,
        value: Option<String>,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { self.write(&key, value.as_deref(), Some(ttl)) })
    }

    fn keys(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now_millis();
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT key FROM kv_entries
                 WHERE namespace = ?1 AND value IS NOT NULL
                   AND (expires_at IS NULL OR expires_at > ?2)
                 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![self.namespace, now], |row| row.get(0))?;
            let mut keys: Vec<String> = Vec::new();
            for row in rows {
                keys.push(row?);
            }
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_store(namespace: &str) -> (SqliteKeyValueStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = SqliteKeyValueStore::with_clock(":memory:", namespace, clock.clone())
            .expect("failed to create in-memory store");
        (store, clock)
    }

    #[test]
    fn test_schema_idempotent() {
        let (store, _) = test_store("ns");
        store.init_db().expect("second init_db failed");
    }

    #[tokio::test]
    async fn test_put_get_and_tombstone() {
        let (kv, _) = test_store("ns");
        kv.put("p1:k1", Some("42".to_string())).await.unwrap();
        assert_eq!(kv.get("p1:k1").await.unwrap(), Some("42".to_string()));
        assert_eq!(kv.keys().await.unwrap(), vec!["p1:k1".to_string()]);

        kv.put("p1:k1", None).await.unwrap();
        assert_eq!(kv.get("p1:k1").await.unwrap(), None);
        assert!(kv.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (kv, clock) = test_store("ns");
        kv.put_with_ttl("old", Some("new".to_string()), Duration::from_secs(3600))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(1800));
        assert_eq!(kv.get("old").await.unwrap(), Some("new".to_string()));
        clock.advance(Duration::from_secs(1800));
        assert_eq!(kv.get("old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_namespaces_share_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let path = path.to_str().unwrap();
        let a = SqliteKeyValueStore::new(path, "a").unwrap();
        let b = SqliteKeyValueStore::new(path, "b").unwrap();

        a.put("k", Some("from-a".to_string())).await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), None);
        assert!(b.keys().await.unwrap().is_empty());

        // Durable across reopen.
        drop(a);
        let reopened = SqliteKeyValueStore::new(path, "a").unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some("from-a".to_string()));
    }
}
