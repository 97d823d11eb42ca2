//! Adapter for legacy binary managers.
//!
//! A [`BinaryManager`] stores content under its digest and knows nothing
//! about providers or key strategies. [`BinaryManagerProvider`] wraps one
//! so the registry can hand it out like any other provider.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::{BlobProvider, PROP_TRANSIENT};
use crate::storage::backend::{BlobStore, DigestAlgorithm, KeyStrategy};

/// Legacy digest-addressed storage interface.
pub trait BinaryManager: Send + Sync + 'static {
    fn initialize(
        &mut self,
        id: &str,
        properties: &HashMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }

    fn digest_algorithm(&self) -> DigestAlgorithm;

    /// Store `data`, returning its digest.
    fn store_binary(
        &self,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;

    fn get_binary(
        &self,
        digest: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Bytes>>> + Send + '_>>;

    fn remove_binary(
        &self,
        digest: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// A [`BlobStore`] view over a binary manager. Keys are digests.
pub struct BinaryManagerStore {
    store_id: String,
    key_strategy: KeyStrategy,
    manager: Arc<dyn BinaryManager>,
}

impl BlobStore for BinaryManagerStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn key_strategy(&self) -> &KeyStrategy {
        &self.key_strategy
    }

    fn put(&self, data: Bytes) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        self.manager.store_binary(data)
    }

    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Bytes>>> + Send + '_>> {
        self.manager.get_binary(key)
    }

    fn delete_blob(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        self.manager.remove_binary(key)
    }
}

/// Provider wrapping a [`BinaryManager`].
pub struct BinaryManagerProvider {
    pending: Option<Box<dyn BinaryManager>>,
    store: Option<Arc<BinaryManagerStore>>,
    transient: bool,
}

impl BinaryManagerProvider {
    pub fn new(manager: Box<dyn BinaryManager>) -> Self {
        Self {
            pending: Some(manager),
            store: None,
            transient: false,
        }
    }
}

impl BlobProvider for BinaryManagerProvider {
    fn initialize(
        &mut self,
        id: &str,
        properties: &HashMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let id = id.to_string();
        let properties = properties.clone();
        Box::pin(async move {
            let mut manager = self
                .pending
                .take()
                .ok_or_else(|| anyhow::anyhow!("binary manager for {id} already initialized"))?;
            manager.initialize(&id, &properties).await?;
            self.transient = properties
                .get(PROP_TRANSIENT)
                .is_some_and(|v| v.eq_ignore_ascii_case("true"));
            self.store = Some(Arc::new(BinaryManagerStore {
                store_id: format!("binary:{id}"),
                key_strategy: KeyStrategy::Digest(manager.digest_algorithm()),
                manager: Arc::from(manager),
            }));
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Some(store) = &self.store {
                store.manager.close().await;
            }
        })
    }

    fn is_transient(&self) -> bool {
        self.transient
    }

    fn blob_store(&self) -> anyhow::Result<Arc<dyn BlobStore>> {
        match &self.store {
            Some(store) => Ok(store.clone()),
            None => anyhow::bail!("binary manager provider is not initialized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct MapBinaryManager {
        binaries: tokio::sync::RwLock<HashMap<String, Bytes>>,
        closed: Arc<AtomicBool>,
    }

    impl BinaryManager for MapBinaryManager {
        fn initialize(
            &mut self,
            _id: &str,
            _properties: &HashMap<String, String>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async move { self.closed.store(true, Ordering::SeqCst) })
        }

        fn digest_algorithm(&self) -> DigestAlgorithm {
            DigestAlgorithm::Sha256
        }

        fn store_binary(
            &self,
            data: Bytes,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
            Box::pin(async move {
                let digest = DigestAlgorithm::Sha256.hex_digest(&data);
                self.binaries.write().await.insert(digest.clone(), data);
                Ok(digest)
            })
        }

        fn get_binary(
            &self,
            digest: &str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Bytes>>> + Send + '_>> {
            let digest = digest.to_string();
            Box::pin(async move { Ok(self.binaries.read().await.get(&digest).cloned()) })
        }

        fn remove_binary(
            &self,
            digest: &str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
            let digest = digest.to_string();
            Box::pin(async move {
                self.binaries.write().await.remove(&digest);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_adapter_exposes_digest_store() {
        let closed = Arc::new(AtomicBool::new(false));
        let manager = MapBinaryManager {
            closed: closed.clone(),
            ..Default::default()
        };
        let mut provider = BinaryManagerProvider::new(Box::new(manager));
        let props: HashMap<String, String> =
            [(PROP_TRANSIENT.to_string(), "true".to_string())].into_iter().collect();
        provider.initialize("legacy", &props).await.unwrap();

        assert!(provider.is_transient());
        assert!(!provider.is_record_mode());

        let store = provider.blob_store().unwrap();
        assert_eq!(store.store_id(), "binary:legacy");
        assert!(store.key_strategy().use_de_duplication());

        let key = store.put(Bytes::from("legacy bytes")).await.unwrap();
        assert_eq!(key, DigestAlgorithm::Sha256.hex_digest(b"legacy bytes"));
        assert!(store.get(&key).await.unwrap().is_some());
        store.delete_blob(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());

        provider.close().await;
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_double_initialize_fails() {
        let mut provider = BinaryManagerProvider::new(Box::new(MapBinaryManager::default()));
        provider.initialize("legacy", &HashMap::new()).await.unwrap();
        assert!(provider.initialize("legacy", &HashMap::new()).await.is_err());
    }
}
