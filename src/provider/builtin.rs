//! Built-in provider backends: `memory` and `local`.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use super::{Backend, BackendFactory, BlobProvider, ProviderSettings, PROP_PATH};
use crate::storage::backend::BlobStore;
use crate::storage::local::LocalBlobStore;
use crate::storage::memory::MemoryBlobStore;

/// Kind name of [`MemoryBlobProvider`].
pub const KIND_MEMORY: &str = "memory";
/// Kind name of [`LocalBlobProvider`].
pub const KIND_LOCAL: &str = "local";

/// Root used by `local` providers configured without a `path`.
const DEFAULT_LOCAL_ROOT: &str = "./data/blobs";

/// The factory map every registry starts with.
pub fn default_factories() -> HashMap<String, BackendFactory> {
    let mut factories: HashMap<String, BackendFactory> = HashMap::new();
    factories.insert(
        KIND_MEMORY.to_string(),
        Arc::new(|| Backend::Blob(Box::new(MemoryBlobProvider::default()))),
    );
    factories.insert(
        KIND_LOCAL.to_string(),
        Arc::new(|| Backend::Blob(Box::new(LocalBlobProvider::default()))),
    );
    factories
}

/// Provider over a [`MemoryBlobStore`].
///
/// Content does not survive re-initialization.
#[derive(Default)]
pub struct MemoryBlobProvider {
    settings: Option<ProviderSettings>,
    store: Option<Arc<MemoryBlobStore>>,
}

impl BlobProvider for MemoryBlobProvider {
    fn initialize(
        &mut self,
        id: &str,
        properties: &HashMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let id = id.to_string();
        let settings = ProviderSettings::from_properties(properties);
        Box::pin(async move {
            let settings = settings?;
            let store_id = match &settings.namespace {
                Some(ns) => format!("memory:{id}:{ns}"),
                None => format!("memory:{id}"),
            };
            self.store = Some(Arc::new(MemoryBlobStore::with_id(
                store_id,
                settings.key_strategy.clone(),
            )));
            self.settings = Some(settings);
            Ok(())
        })
    }

    fn is_transactional(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.transactional)
    }

    fn is_record_mode(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.record_mode)
    }

    fn is_transient(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.transient)
    }

    fn blob_store(&self) -> anyhow::Result<Arc<dyn BlobStore>> {
        match &self.store {
            Some(store) => Ok(store.clone()),
            None => anyhow::bail!("memory provider is not initialized"),
        }
    }
}

/// Provider over a [`LocalBlobStore`] rooted at `path`/`namespace`.
#[derive(Default)]
pub struct LocalBlobProvider {
    settings: Option<ProviderSettings>,
    store: Option<Arc<LocalBlobStore>>,
}

impl BlobProvider for LocalBlobProvider {
    fn initialize(
        &mut self,
        id: &str,
        properties: &HashMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let root = properties
            .get(PROP_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_ROOT).join(id));
        let settings = ProviderSettings::from_properties(properties);
        Box::pin(async move {
            let settings = settings?;
            let root = match &settings.namespace {
                Some(ns) => root.join(ns),
                None => root,
            };
            let store = LocalBlobStore::new(root, settings.key_strategy.clone())?;
            tracing::debug!("Local blob store opened at {}", store.root().display());
            self.store = Some(Arc::new(store));
            self.settings = Some(settings);
            Ok(())
        })
    }

    fn is_transactional(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.transactional)
    }

    fn is_record_mode(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.record_mode)
    }

    fn is_transient(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.transient)
    }

    fn blob_store(&self) -> anyhow::Result<Arc<dyn BlobStore>> {
        match &self.store {
            Some(store) => Ok(store.clone()),
            None => anyhow::bail!("local provider is not initialized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{PROP_NAMESPACE, PROP_RECORD};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_memory_provider_lifecycle() {
        let mut provider = MemoryBlobProvider::default();
        assert!(provider.blob_store().is_err());

        let props: HashMap<String, String> =
            [(PROP_RECORD.to_string(), "true".to_string())].into_iter().collect();
        provider.initialize("records", &props).await.unwrap();

        assert!(provider.is_record_mode());
        assert!(!provider.is_transient());
        let store = provider.blob_store().unwrap();
        assert_eq!(store.store_id(), "memory:records");
        let key = store.put(Bytes::from("abc")).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_local_provider_uses_namespace_dir() {
        let dir = tempfile::tempdir().unwrap();
        let props: HashMap<String, String> = [
            (PROP_PATH.to_string(), dir.path().display().to_string()),
            (PROP_NAMESPACE.to_string(), "repo2".to_string()),
        ]
        .into_iter()
        .collect();

        let mut provider = LocalBlobProvider::default();
        provider.initialize("repo2", &props).await.unwrap();
        assert_eq!(
            provider.store.as_ref().unwrap().root(),
            dir.path().join("repo2")
        );
        provider
            .blob_store()
            .unwrap()
            .put(Bytes::from("data"))
            .await
            .unwrap();
        assert!(dir.path().join("repo2").is_dir());
    }

    #[tokio::test]
    async fn test_bad_properties_fail_initialize() {
        let props: HashMap<String, String> =
            [("digest".to_string(), "whirlpool".to_string())].into_iter().collect();
        let mut provider = MemoryBlobProvider::default();
        assert!(provider.initialize("x", &props).await.is_err());
    }
}
