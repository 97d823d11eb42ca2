//! Local filesystem blob store.
//!
//! Blobs are stored as flat files under a root directory, sharded by the
//! first two pairs of key characters (`ab/cd/abcdef...`). All writes
//! follow crash-only design: write to temp file, fsync, rename.

use bytes::Bytes;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use super::backend::{BlobStore, KeyStrategy};

/// Stores blobs on the local filesystem.
pub struct LocalBlobStore {
    store_id: String,
    root: PathBuf,
    key_strategy: KeyStrategy,
}

impl LocalBlobStore {
    /// Create a new `LocalBlobStore` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>, key_strategy: KeyStrategy) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        let canonical = root.canonicalize().unwrap_or_else(|_| root.clone());
        Ok(Self {
            store_id: format!("local:{}", canonical.display()),
            root,
            key_strategy,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its file path.
    ///
    /// Keys are single path components; anything that could escape the
    /// root directory is rejected.
    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.len() < 4
            || key.starts_with('.')
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!("invalid blob key: {key:?}");
        }
        Ok(self.root.join(&key[0..2]).join(&key[2..4]).join(key))
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{id}"))
    }
}

impl BlobStore for LocalBlobStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn key_strategy(&self) -> &KeyStrategy {
        &self.key_strategy
    }

    fn put(&self, data: Bytes) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        Box::pin(async move {
            let key = self.key_strategy.key_for(&data);
            let final_path = self.resolve(&key)?;

            if self.key_strategy.use_de_duplication() && final_path.is_file() {
                return Ok(key);
            }

            if let Some(parent) = final_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let tmp_path = self.temp_path();
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &final_path)?;

            Ok(key)
        })
    }

    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Bytes>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let path = self.resolve(&key)?;
            match std::fs::read(&path) {
                Ok(data) => Ok(Some(Bytes::from(data))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete_blob(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let path = self.resolve(&key)?;
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                // Idempotent: a concurrent sweeper may have got there first.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn copy_blob<'a>(
        &'a self,
        source: &'a dyn BlobStore,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            if source.store_id() == self.store_id && self.key_strategy.use_de_duplication() {
                let path = self.resolve(key)?;
                if path.is_file() {
                    return Ok(key.to_string());
                }
            }
            let data = source.get(key).await?.ok_or_else(|| {
                anyhow::anyhow!("blob {key} not found in store {}", source.store_id())
            })?;
            self.put(data).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::DigestAlgorithm;

    fn test_store(dir: &Path) -> LocalBlobStore {
        LocalBlobStore::new(dir, KeyStrategy::Digest(DigestAlgorithm::Md5)).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());

        let key = store.put(Bytes::from("hello world")).await.unwrap();
        assert_eq!(key, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(dir.path().join("5e/b6").join(&key).is_file());

        let data = store.get(&key).await.unwrap();
        assert_eq!(data, Some(Bytes::from("hello world")));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        assert_eq!(store.get("0123456789abcdef").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let key = store.put(Bytes::from("data")).await.unwrap();

        store.delete_blob(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
        store.delete_blob(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        assert!(store.get("../../etc/passwd").await.is_err());
        assert!(store.delete_blob("..").await.is_err());
    }

    #[tokio::test]
    async fn test_same_root_copy_is_optimized() {
        let dir = tempfile::tempdir().unwrap();
        let a = test_store(dir.path());
        let b = test_store(dir.path());
        assert!(a.copy_blob_is_optimized(&b));

        let key = a.put(Bytes::from("shared")).await.unwrap();
        assert_eq!(b.copy_blob(&a, &key).await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_retention_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let key = store.put(Bytes::from("x")).await.unwrap();
        assert!(!store.is_retained(&key).await.unwrap());
        assert!(store
            .update_retention(&key, crate::storage::backend::RetentionUpdate::LegalHold(true))
            .await
            .is_err());
    }
}
