//! In-memory blob store.
//!
//! Blobs are held in a `tokio::sync::RwLock<HashMap<...>>`. Retention and
//! legal hold are tracked per key so record-mode providers can be run
//! without an object-lock capable backend.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::backend::{BlobStore, KeyStrategy, RetentionUpdate};

#[derive(Debug, Clone, Default)]
struct Retention {
    retain_until: Option<DateTime<Utc>>,
    legal_hold: bool,
}

impl Retention {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.legal_hold || self.retain_until.is_some_and(|until| until > now)
    }
}

/// In-memory blob store.
pub struct MemoryBlobStore {
    store_id: String,
    key_strategy: KeyStrategy,
    blobs: tokio::sync::RwLock<HashMap<String, Bytes>>,
    retention: tokio::sync::RwLock<HashMap<String, Retention>>,
}

impl MemoryBlobStore {
    pub fn new(key_strategy: KeyStrategy) -> Self {
        Self::with_id(format!("memory-{}", uuid::Uuid::new_v4()), key_strategy)
    }

    /// Create a store with an explicit id.
    pub fn with_id(store_id: impl Into<String>, key_strategy: KeyStrategy) -> Self {
        Self {
            store_id: store_id.into(),
            key_strategy,
            blobs: tokio::sync::RwLock::new(HashMap::new()),
            retention: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.read().await.contains_key(key)
    }
}

impl BlobStore for MemoryBlobStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn key_strategy(&self) -> &KeyStrategy {
        &self.key_strategy
    }

    fn put(&self, data: Bytes) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        Box::pin(async move {
            let key = self.key_strategy.key_for(&data);
            let mut blobs = self.blobs.write().await;
            // Content-addressed: an existing key already holds these bytes.
            blobs.entry(key.clone()).or_insert(data);
            Ok(key)
        })
    }

    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Bytes>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let blobs = self.blobs.read().await;
            Ok(blobs.get(&key).cloned())
        })
    }

    fn delete_blob(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut retention = self.retention.write().await;
            if retention
                .get(&key)
                .is_some_and(|r| r.is_active(Utc::now()))
            {
                anyhow::bail!("blob {key} in store {} is retained", self.store_id);
            }
            retention.remove(&key);
            drop(retention);
            self.blobs.write().await.remove(&key);
            Ok(())
        })
    }

    fn copy_blob<'a>(
        &'a self,
        source: &'a dyn BlobStore,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            if source.store_id() == self.store_id
                && self.key_strategy.use_de_duplication()
                && self.contains(key).await
            {
                return Ok(key.to_string());
            }
            let data = source.get(key).await?.ok_or_else(|| {
                anyhow::anyhow!("blob {key} not found in store {}", source.store_id())
            })?;
            self.put(data).await
        })
    }

    fn update_retention(
        &self,
        key: &str,
        update: RetentionUpdate,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            if !self.contains(&key).await {
                anyhow::bail!("blob {key} not found in store {}", self.store_id);
            }
            let mut retention = self.retention.write().await;
            match update {
                RetentionUpdate::RetainUntil(until) => {
                    let entry = retention.entry(key).or_default();
                    // Retention can only be extended.
                    if entry.retain_until.map_or(true, |current| until > current) {
                        entry.retain_until = Some(until);
                    }
                }
                RetentionUpdate::LegalHold(hold) => {
                    retention.entry(key).or_default().legal_hold = hold;
                }
                RetentionUpdate::Release => {
                    retention.remove(&key);
                }
            }
            Ok(())
        })
    }

    fn is_retained(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let retention = self.retention.read().await;
            Ok(retention
                .get(&key)
                .is_some_and(|r| r.is_active(Utc::now())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::DigestAlgorithm;
    use chrono::Duration;

    fn test_store() -> MemoryBlobStore {
        MemoryBlobStore::new(KeyStrategy::Digest(DigestAlgorithm::Md5))
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let store = test_store();
        let key = store.put(Bytes::from("hello world")).await.unwrap();
        assert_eq!(key, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let data = store.get(&key).await.unwrap();
        assert_eq!(data, Some(Bytes::from("hello world")));
    }

    #[tokio::test]
    async fn test_put_deduplicates() {
        let store = test_store();
        let k1 = store.put(Bytes::from("same")).await.unwrap();
        let k2 = store.put(Bytes::from("same")).await.unwrap();
        assert_eq!(k1, k2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_random_keys_do_not_deduplicate() {
        let store = MemoryBlobStore::new(KeyStrategy::Random);
        let k1 = store.put(Bytes::from("same")).await.unwrap();
        let k2 = store.put(Bytes::from("same")).await.unwrap();
        assert_ne!(k1, k2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = test_store();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let store = test_store();
        store.delete_blob("no-such-key").await.unwrap();
        store.delete_blob("no-such-key").await.unwrap();
    }

    #[tokio::test]
    async fn test_retained_blob_cannot_be_deleted() {
        let store = test_store();
        let key = store.put(Bytes::from("record")).await.unwrap();
        store
            .update_retention(&key, RetentionUpdate::RetainUntil(Utc::now() + Duration::days(1)))
            .await
            .unwrap();

        assert!(store.is_retained(&key).await.unwrap());
        assert!(store.delete_blob(&key).await.is_err());
        assert!(store.contains(&key).await);

        store
            .update_retention(&key, RetentionUpdate::Release)
            .await
            .unwrap();
        store.delete_blob(&key).await.unwrap();
        assert!(!store.contains(&key).await);
    }

    #[tokio::test]
    async fn test_legal_hold_and_expired_retention() {
        let store = test_store();
        let key = store.put(Bytes::from("held")).await.unwrap();
        store
            .update_retention(&key, RetentionUpdate::RetainUntil(Utc::now() - Duration::days(1)))
            .await
            .unwrap();
        assert!(!store.is_retained(&key).await.unwrap());

        store
            .update_retention(&key, RetentionUpdate::LegalHold(true))
            .await
            .unwrap();
        assert!(store.is_retained(&key).await.unwrap());
        store
            .update_retention(&key, RetentionUpdate::LegalHold(false))
            .await
            .unwrap();
        assert!(!store.is_retained(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_within_same_store_is_optimized() {
        let store = test_store();
        let key = store.put(Bytes::from("copy me")).await.unwrap();
        assert!(store.copy_blob_is_optimized(&store));
        let copied = store.copy_blob(&store, &key).await.unwrap();
        assert_eq!(copied, key);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_copy_between_stores() {
        let src = test_store();
        let dst = MemoryBlobStore::new(KeyStrategy::Digest(DigestAlgorithm::Sha256));
        let key = src.put(Bytes::from("move me")).await.unwrap();

        assert!(!dst.copy_blob_is_optimized(&src));
        let new_key = dst.copy_blob(&src, &key).await.unwrap();
        assert_ne!(new_key, key);
        assert_eq!(dst.get(&new_key).await.unwrap(), Some(Bytes::from("move me")));
    }
}
