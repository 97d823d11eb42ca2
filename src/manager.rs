//! Blob manager: the entry point a content repository talks to.
//!
//! Wires the provider registry, the dispatcher, the deletion lifecycle and
//! the key replacement ledger together, and owns their startup and
//! shutdown.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, LifecycleConfig};
use crate::dispatch::BlobDispatcher;
use crate::document::{BlobInfo, ContentObject, ManagedBlob, Principal};
use crate::errors::{BlobError, BlobResult};
use crate::kv::memory::MemoryKeyValueStore;
use crate::kv::sqlite::SqliteKeyValueStore;
use crate::kv::KeyValueStore;
use crate::lifecycle::{DeletionLifecycle, KeyReplacementLedger};
use crate::metrics::BLOBS_WRITTEN_TOTAL;
use crate::provider::registry::ProviderRegistry;
use crate::provider::BlobProvider;
use crate::storage::backend::{DigestAlgorithm, KeyStrategy};

const CANDIDATES_NAMESPACE: &str = "deletion_candidates";
const REPLACEMENTS_NAMESPACE: &str = "key_replacements";

/// What `check` reports about a configured manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerSummary {
    /// `rules` or `repository_name`.
    pub dispatch_mode: &'static str,
    pub providers: Vec<String>,
    /// Providers referenced by dispatch rules without a descriptor.
    pub missing_providers: Vec<String>,
    pub namespace_template: String,
}

pub struct BlobManager {
    registry: Arc<ProviderRegistry>,
    dispatcher: Arc<BlobDispatcher>,
    lifecycle: DeletionLifecycle,
    ledger: KeyReplacementLedger,
    namespace_template: String,
}

impl BlobManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        dispatcher: Arc<BlobDispatcher>,
        lifecycle: DeletionLifecycle,
        ledger: KeyReplacementLedger,
        namespace_template: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            lifecycle,
            ledger,
            namespace_template: namespace_template.into(),
        }
    }

    pub async fn from_config(config: &Config) -> BlobResult<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Register every configured provider and open the lifecycle stores.
    /// Providers are built lazily on first use.
    pub async fn from_config_with_clock(
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> BlobResult<Self> {
        let registry = Arc::new(ProviderRegistry::new());
        for descriptor in &config.providers {
            registry.register_provider(descriptor.clone()).await?;
        }
        let dispatcher = Arc::new(BlobDispatcher::from_rules(&config.dispatch.rules));

        let candidates = open_kv_store(&config.lifecycle, CANDIDATES_NAMESPACE, clock.clone())?;
        let replacements = open_kv_store(&config.lifecycle, REPLACEMENTS_NAMESPACE, clock.clone())?;

        let namespace_template = config.dispatch.namespace_template.clone();
        let lifecycle = DeletionLifecycle::new(
            registry.clone(),
            dispatcher.clone(),
            candidates,
            clock,
            config.lifecycle.settings(),
        )
        .with_namespace_template(namespace_template.clone());
        let ledger = KeyReplacementLedger::new(replacements, config.lifecycle.key_replacement_ttl());

        info!(
            "Blob manager ready: {} providers, dispatch by {}, key replacements kept {:?}",
            config.providers.len(),
            if dispatcher.is_rule_based() {
                "rules"
            } else {
                "repository name"
            },
            ledger.ttl()
        );
        Ok(Self::new(
            registry,
            dispatcher,
            lifecycle,
            ledger,
            namespace_template,
        ))
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &BlobDispatcher {
        &self.dispatcher
    }

    pub fn lifecycle(&self) -> &DeletionLifecycle {
        &self.lifecycle
    }

    pub fn ledger(&self) -> &KeyReplacementLedger {
        &self.ledger
    }

    /// Store `data` in the provider dispatched for `xpath` of `doc` and
    /// attach the resulting blob to `doc`.
    pub async fn write_blob(
        &self,
        doc: &mut dyn ContentObject,
        xpath: &str,
        data: Bytes,
        info: BlobInfo,
    ) -> BlobResult<ManagedBlob> {
        let dispatch = self.dispatcher.resolve_provider(&*doc, &info, xpath);
        let provider = self
            .registry
            .provider_for(&dispatch, &self.namespace_template)
            .await?;
        let store = provider.blob_store()?;

        let digest = match store.key_strategy() {
            KeyStrategy::Digest(_) => None,
            KeyStrategy::Random => Some(DigestAlgorithm::Md5.hex_digest(&data)),
        };
        let length = data.len() as u64;
        let key = store.put(data).await?;

        let mut info = info;
        info.digest = digest.or_else(|| Some(key.clone()));
        info.length = Some(length);
        let blob = ManagedBlob::new(&dispatch.provider_id, key, info);
        doc.set_blob(xpath, blob.clone());

        counter!(BLOBS_WRITTEN_TOTAL, "provider" => dispatch.provider_id.clone()).increment(1);
        debug!(
            "Wrote {} bytes at {} of {} to {}:{}",
            length,
            xpath,
            doc.id(),
            blob.provider_id,
            blob.key
        );
        Ok(blob)
    }

    /// Content of `blob`, following a key replacement if one is live.
    /// `Ok(None)` means the store no longer holds it.
    pub async fn read_blob(&self, blob: &ManagedBlob) -> BlobResult<Option<Bytes>> {
        let provider = self.provider(&blob.provider_id).await?;
        let key = self.ledger.resolve(&blob.provider_id, &blob.key).await?;
        Ok(provider.blob_store()?.get(&key).await?)
    }

    /// Republish `blob` under the key its store's current key strategy
    /// assigns. Readers of the old key are redirected for the ledger TTL
    /// and the old key becomes a deletion candidate.
    pub async fn migrate_key(&self, blob: &ManagedBlob) -> BlobResult<ManagedBlob> {
        let provider = self.provider(&blob.provider_id).await?;
        let store = provider.blob_store()?;
        let current = self.ledger.resolve(&blob.provider_id, &blob.key).await?;
        let data = store
            .get(&current)
            .await?
            .ok_or_else(|| anyhow::anyhow!("blob {}:{} is missing", blob.provider_id, current))?;

        let new_key = store.put(data).await?;
        if new_key == current {
            return Ok(ManagedBlob::new(&blob.provider_id, current, blob.info.clone()));
        }
        self.ledger
            .remember(&blob.provider_id, &blob.key, &new_key)
            .await?;
        self.lifecycle
            .mark_for_deletion(&blob.provider_id, &current)
            .await?;
        info!(
            "Migrated blob {}:{} to key {}",
            blob.provider_id, current, new_key
        );

        let mut info = blob.info.clone();
        if matches!(store.key_strategy(), KeyStrategy::Digest(_)) {
            info.digest = Some(new_key.clone());
        }
        Ok(ManagedBlob::new(&blob.provider_id, new_key, info))
    }

    /// Delete the blob at `xpath` of `doc` immediately, subject to the
    /// retention gate.
    pub async fn delete_record_blob(
        &self,
        principal: &Principal,
        doc: &dyn ContentObject,
        xpath: &str,
    ) -> BlobResult<ManagedBlob> {
        self.lifecycle
            .delete_record_blob(principal, doc, xpath)
            .await
    }

    pub async fn summary(&self) -> ManagerSummary {
        let providers = self.registry.provider_ids().await;
        let missing_providers = self
            .dispatcher
            .provider_ids()
            .into_iter()
            .filter(|id| !providers.contains(id))
            .collect::<Vec<_>>();
        for id in &missing_providers {
            warn!("Dispatch rules reference unregistered provider {}", id);
        }
        ManagerSummary {
            dispatch_mode: if self.dispatcher.is_rule_based() {
                "rules"
            } else {
                "repository_name"
            },
            providers,
            missing_providers,
            namespace_template: self.namespace_template.clone(),
        }
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }

    async fn provider(&self, provider_id: &str) -> BlobResult<Arc<dyn BlobProvider>> {
        self.registry
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| BlobError::UnknownProvider {
                provider_id: provider_id.to_string(),
            })
    }
}

fn open_kv_store(
    config: &LifecycleConfig,
    namespace: &str,
    clock: Arc<dyn Clock>,
) -> BlobResult<Arc<dyn KeyValueStore>> {
    match config.store.as_str() {
        "memory" => Ok(Arc::new(MemoryKeyValueStore::with_clock(clock))),
        "sqlite" => {
            if let Some(parent) = Path::new(&config.sqlite_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(anyhow::Error::from)?;
                }
            }
            let store = SqliteKeyValueStore::with_clock(&config.sqlite_path, namespace, clock)?;
            Ok(Arc::new(store))
        }
        other => Err(BlobError::configuration(format!(
            "unknown lifecycle store {other:?}, expected memory or sqlite"
        ))),
    }
}
