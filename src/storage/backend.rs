//! Abstract blob store trait.
//!
//! A [`BlobStore`] holds opaque byte content under string keys. Keys are
//! either derived from the content (deduplicating, content-addressable)
//! or random, as decided by the store's [`KeyStrategy`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;

/// Digest used by content-addressable key strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Parse a configuration value (`MD5`, `SHA-256`, case-insensitive).
    pub fn parse(name: &str) -> anyhow::Result<Self> {
        match name.to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            other => anyhow::bail!("unsupported digest algorithm: {other}"),
        }
    }

    /// Hex-encoded digest of `data`.
    pub fn hex_digest(&self, data: &[u8]) -> String {
        match self {
            DigestAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                hasher.update(data);
                hex::encode(hasher.finalize())
            }
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                hex::encode(hasher.finalize())
            }
        }
    }
}

/// How a store derives keys for new content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Key is the hex digest of the content; identical content shares a key.
    Digest(DigestAlgorithm),
    /// Key is a fresh random identifier for every write.
    Random,
}

impl KeyStrategy {
    pub fn use_de_duplication(&self) -> bool {
        matches!(self, KeyStrategy::Digest(_))
    }

    pub fn key_for(&self, data: &[u8]) -> String {
        match self {
            KeyStrategy::Digest(algorithm) => algorithm.hex_digest(data),
            KeyStrategy::Random => uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

impl Default for KeyStrategy {
    fn default() -> Self {
        KeyStrategy::Digest(DigestAlgorithm::Md5)
    }
}

/// A change to the retention state of one stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionUpdate {
    /// Retain until the given instant.
    RetainUntil(DateTime<Utc>),
    /// Set or lift a legal hold.
    LegalHold(bool),
    /// Drop both retain-until and legal hold.
    Release,
}

/// Async blob storage contract.
pub trait BlobStore: Send + Sync + 'static {
    /// Identifier of the physical store. Two stores with the same id share
    /// their content.
    fn store_id(&self) -> &str;

    fn key_strategy(&self) -> &KeyStrategy;

    /// Write `data`, returning its key.
    fn put(&self, data: Bytes) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;

    /// Read the blob at `key`, or `None` if it does not exist.
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Bytes>>> + Send + '_>>;

    /// Delete the blob at `key`. Deleting an absent key succeeds.
    fn delete_blob(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Whether [`copy_blob`](Self::copy_blob) from `other` avoids moving
    /// bytes through this process.
    fn copy_blob_is_optimized(&self, other: &dyn BlobStore) -> bool {
        self.store_id() == other.store_id()
    }

    /// Copy the blob at `key` from `source` into this store, returning the
    /// key under which this store holds it.
    fn copy_blob<'a>(
        &'a self,
        source: &'a dyn BlobStore,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let data = source.get(key).await?.ok_or_else(|| {
                anyhow::anyhow!("blob {key} not found in store {}", source.store_id())
            })?;
            self.put(data).await
        })
    }

    /// Change retention or legal hold on a stored blob.
    fn update_retention(
        &self,
        key: &str,
        update: RetentionUpdate,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        let store_id = self.store_id().to_string();
        Box::pin(async move {
            anyhow::bail!("store {store_id} does not support retention (key {key}, {update:?})")
        })
    }

    /// Whether the blob at `key` currently may not be deleted.
    fn is_retained(
        &self,
        _key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async { Ok(false) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_digest_of_empty() {
        assert_eq!(
            DigestAlgorithm::Md5.hex_digest(b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_parse_digest_names() {
        assert_eq!(DigestAlgorithm::parse("MD5").unwrap(), DigestAlgorithm::Md5);
        assert_eq!(
            DigestAlgorithm::parse("SHA-256").unwrap(),
            DigestAlgorithm::Sha256
        );
        assert!(DigestAlgorithm::parse("crc32").is_err());
    }

    #[test]
    fn test_key_strategies() {
        let digest = KeyStrategy::Digest(DigestAlgorithm::Sha256);
        assert!(digest.use_de_duplication());
        assert_eq!(digest.key_for(b"abc"), digest.key_for(b"abc"));

        let random = KeyStrategy::Random;
        assert!(!random.use_de_duplication());
        assert_ne!(random.key_for(b"abc"), random.key_for(b"abc"));
    }
}
