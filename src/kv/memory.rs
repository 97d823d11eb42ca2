//! In-memory key-value store with TTL support.
//!
//! Expiry is checked against an injected [`Clock`] on every read, and
//! expired entries are purged on write.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::KeyValueStore;
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct Entry {
    value: Option<String>,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// In-memory [`KeyValueStore`].
pub struct MemoryKeyValueStore {
    data: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of entries held, tombstones and not-yet-purged expired
    /// entries included.
    pub fn raw_len(&self) -> usize {
        self.data.read().expect("rwlock poisoned").len()
    }

    fn write(&self, key: &str, value: Option<String>, ttl: Option<Duration>) {
        let now = self.clock.now_millis();
        let mut data = self.data.write().expect("rwlock poisoned");
        data.retain(|_, entry| !entry.is_expired(now));
        data.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| now + ttl.as_millis() as i64),
            },
        );
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let now = self.clock.now_millis();
            let data = self.data.read().expect("rwlock poisoned");
            Ok(data
                .get(&key)
                .filter(|entry| !entry.is_expired(now))
                .and_then(|entry| entry.value.clone()))
        })
    }

    fn put(
        &self,
        key: &str,
        value: Option<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.write(&key, value, None);
            Ok(())
        })
    }

    fn put_with_ttl(
        &self,
        key: &str,
        value: Option<String>,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.write(&key, value, Some(ttl));
            Ok(())
        })
    }

    fn keys(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now_millis();
            let data = self.data.read().expect("rwlock poisoned");
            let mut keys: Vec<String> = data
                .iter()
                .filter(|(_, entry)| entry.value.is_some() && !entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.sort();
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_store() -> (MemoryKeyValueStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (MemoryKeyValueStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_put_get() {
        let (kv, _) = test_store();
        kv.put("a", Some("1".to_string())).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(kv.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (kv, clock) = test_store();
        kv.put_with_ttl("a", Some("1".to_string()), Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(59));
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
        clock.advance(Duration::from_secs(1));
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert!(kv.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tombstone_hides_value_but_keeps_key() {
        let (kv, _) = test_store();
        kv.put("a", Some("1".to_string())).await.unwrap();
        kv.put("a", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert!(kv.keys().await.unwrap().is_empty());
        assert_eq!(kv.raw_len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_purged_on_write() {
        let (kv, clock) = test_store();
        kv.put_with_ttl("a", None, Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));
        kv.put("b", Some("2".to_string())).await.unwrap();
        assert_eq!(kv.raw_len(), 1);
        assert_eq!(kv.keys().await.unwrap(), vec!["b".to_string()]);
    }
}
