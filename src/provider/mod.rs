//! Blob providers: named, configured owners of a blob store.
//!
//! A provider is described by a [`ProviderDescriptor`] and instantiated
//! lazily by the [`registry::ProviderRegistry`] through a factory keyed on
//! the descriptor's `kind`. A factory yields either a native
//! [`BlobProvider`] or a legacy [`binary::BinaryManager`]; the latter is
//! wrapped once at construction time.

pub mod binary;
pub mod builtin;
pub mod registry;

use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::storage::backend::{BlobStore, DigestAlgorithm, KeyStrategy};

use binary::BinaryManager;

/// Descriptors whose name starts with this prefix yield transient providers.
pub const TRANSIENT_PREFIX: &str = "transient";

/// Storage namespace inside the backend, set when cloning descriptors.
pub const PROP_NAMESPACE: &str = "namespace";
pub const PROP_TRANSIENT: &str = "transient";
/// Write-once storage semantics.
pub const PROP_RECORD: &str = "record";
pub const PROP_TRANSACTIONAL: &str = "transactional";
/// `digest` (default) or `random`.
pub const PROP_KEY_STRATEGY: &str = "key_strategy";
/// Digest algorithm for content-addressed keys (`MD5` by default).
pub const PROP_DIGEST: &str = "digest";
/// Root directory of filesystem-backed providers.
pub const PROP_PATH: &str = "path";

/// Configuration of one named provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    /// Backend kind, looked up in the registry's factory map.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Overlay `other` onto this descriptor. A non-empty kind replaces the
    /// current one and properties are merged per key, last one wins.
    pub fn merge(&mut self, other: ProviderDescriptor) {
        if !other.kind.is_empty() {
            self.kind = other.kind;
        }
        self.properties.extend(other.properties);
    }

    pub fn is_transient(&self) -> bool {
        self.name.starts_with(TRANSIENT_PREFIX)
    }
}

/// Async provider contract.
pub trait BlobProvider: Send + Sync + 'static {
    /// Set up the backend. Called exactly once, before the provider is
    /// handed out.
    fn initialize(
        &mut self,
        id: &str,
        properties: &HashMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Release backend resources.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }

    fn is_transactional(&self) -> bool {
        false
    }

    /// Write-once storage: blobs are never overwritten and deletions are
    /// subject to retention.
    fn is_record_mode(&self) -> bool {
        false
    }

    /// No durable deletion guarantees are required.
    fn is_transient(&self) -> bool {
        false
    }

    fn blob_store(&self) -> anyhow::Result<Arc<dyn BlobStore>>;
}

/// What a backend factory produces.
pub enum Backend {
    Blob(Box<dyn BlobProvider>),
    Binary(Box<dyn BinaryManager>),
}

/// Constructor registered under a backend kind.
pub type BackendFactory = Arc<dyn Fn() -> Backend + Send + Sync>;

/// Provider flags and key strategy parsed from descriptor properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub record_mode: bool,
    pub transactional: bool,
    pub transient: bool,
    pub namespace: Option<String>,
    pub key_strategy: KeyStrategy,
}

impl ProviderSettings {
    pub fn from_properties(properties: &HashMap<String, String>) -> anyhow::Result<Self> {
        let flag = |name: &str| {
            properties
                .get(name)
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        };
        let digest = match properties.get(PROP_DIGEST) {
            Some(name) => DigestAlgorithm::parse(name)?,
            None => DigestAlgorithm::Md5,
        };
        let key_strategy = match properties.get(PROP_KEY_STRATEGY).map(String::as_str) {
            None | Some("digest") => KeyStrategy::Digest(digest),
            Some("random") => KeyStrategy::Random,
            Some(other) => anyhow::bail!("unknown key strategy: {other}"),
        };
        Ok(Self {
            record_mode: flag(PROP_RECORD),
            transactional: flag(PROP_TRANSACTIONAL),
            transient: flag(PROP_TRANSIENT),
            namespace: properties
                .get(PROP_NAMESPACE)
                .filter(|ns| !ns.is_empty())
                .cloned(),
            key_strategy,
        })
    }
}
