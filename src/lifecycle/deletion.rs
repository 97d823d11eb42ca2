//! Deletion candidates and the grace-delayed sweep.
//!
//! Blobs that may have lost their last reference are recorded in a
//! key-value store as `provider_id:key -> marked_at_millis`. A sweep
//! deletes candidates older than the grace delay. Several sweepers may
//! share one candidate store: each re-reads a candidate right before
//! acting on it and claims it by writing a tombstone, so a blob is
//! normally deleted once. A duplicate delete of an absent key is a no-op
//! in every store.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::retention::check_deletable;
use super::{BlobEvent, EventBus};
use crate::clock::Clock;
use crate::dispatch::BlobDispatcher;
use crate::document::{Capability, ContentObject, ManagedBlob, Principal};
use crate::errors::{BlobError, BlobResult};
use crate::kv::KeyValueStore;
use crate::metrics::{
    BLOBS_DELETED_TOTAL, BLOBS_MOVED_TOTAL, CANDIDATES_MARKED_TOTAL, SWEEPS_TOTAL,
    SWEEP_CANDIDATES_TOTAL,
};
use crate::provider::registry::ProviderRegistry;
use crate::storage::backend::RetentionUpdate;

/// Tunables read on every sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Minimum age of a candidate before it is deleted.
    pub grace_delay: Duration,
    /// How long claimed-candidate tombstones are kept.
    pub tombstone_ttl: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            grace_delay: Duration::from_secs(3600),
            tombstone_ttl: Duration::from_secs(86400),
        }
    }
}

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub within_grace: usize,
    /// Cleared by another sweeper between listing and processing.
    pub already_claimed: usize,
    /// Kept because the store reports the blob under retention.
    pub retained: usize,
    /// Kept because no provider is registered under the candidate's id.
    pub missing_provider: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record_metrics(&self) {
        counter!(SWEEPS_TOTAL).increment(1);
        for (outcome, count) in [
            ("deleted", self.deleted),
            ("within_grace", self.within_grace),
            ("already_claimed", self.already_claimed),
            ("retained", self.retained),
            ("missing_provider", self.missing_provider),
            ("failed", self.failed),
        ] {
            if count > 0 {
                counter!(SWEEP_CANDIDATES_TOTAL, "outcome" => outcome).increment(count as u64);
            }
        }
    }
}

pub struct DeletionLifecycle {
    registry: Arc<ProviderRegistry>,
    dispatcher: Arc<BlobDispatcher>,
    candidates: Arc<dyn KeyValueStore>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    namespace_template: String,
    settings: RwLock<LifecycleSettings>,
}

impl DeletionLifecycle {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        dispatcher: Arc<BlobDispatcher>,
        candidates: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            candidates,
            events: EventBus::new(),
            clock,
            namespace_template: crate::dispatch::DEFAULT_RULE.to_string(),
            settings: RwLock::new(settings),
        }
    }

    /// Provider cloned for repositories without their own descriptor.
    pub fn with_namespace_template(mut self, template: impl Into<String>) -> Self {
        self.namespace_template = template.into();
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> LifecycleSettings {
        self.settings.read().expect("rwlock poisoned").clone()
    }

    /// Takes effect on the next [`sweep`](Self::sweep).
    pub fn set_grace_delay(&self, grace_delay: Duration) {
        self.settings.write().expect("rwlock poisoned").grace_delay = grace_delay;
        info!("Deletion grace delay set to {:?}", grace_delay);
    }

    /// Record `key` of `provider_id` as possibly deletable. Marking again
    /// restarts its grace period.
    pub async fn mark_for_deletion(&self, provider_id: &str, key: &str) -> BlobResult<()> {
        let marked_at = self.clock.now_millis();
        self.candidates
            .put(&candidate_key(provider_id, key), Some(marked_at.to_string()))
            .await?;
        counter!(CANDIDATES_MARKED_TOTAL).increment(1);
        debug!("Marked {}:{} for deletion at {}", provider_id, key, marked_at);
        Ok(())
    }

    /// Sweep with the currently configured grace delay.
    pub async fn sweep(&self) -> BlobResult<SweepReport> {
        let grace_delay = self.settings().grace_delay;
        self.sweep_and_delete(grace_delay).await
    }

    /// Delete every candidate marked at least `grace_delay` ago.
    ///
    /// Store failures are counted per candidate and do not stop the sweep;
    /// a failed candidate is restored so the next sweep retries it.
    /// Failures of the candidate store itself are returned.
    pub async fn sweep_and_delete(&self, grace_delay: Duration) -> BlobResult<SweepReport> {
        let tombstone_ttl = self.settings().tombstone_ttl;
        let grace_millis = grace_delay.as_millis() as i64;
        let mut report = SweepReport::default();

        for candidate in self.candidates.keys().await? {
            report.scanned += 1;

            let Some(marked) = self.candidates.get(&candidate).await? else {
                report.already_claimed += 1;
                continue;
            };
            let (Some((provider_id, key)), Ok(marked_at)) =
                (candidate.split_once(':'), marked.parse::<i64>())
            else {
                warn!("Discarding malformed deletion candidate {}={}", candidate, marked);
                self.candidates
                    .put_with_ttl(&candidate, None, tombstone_ttl)
                    .await?;
                report.failed += 1;
                continue;
            };

            let now = self.clock.now_millis();
            if now - marked_at < grace_millis {
                report.within_grace += 1;
                continue;
            }

            let provider = match self.registry.get_provider(provider_id).await {
                Ok(Some(provider)) => provider,
                Ok(None) => {
                    warn!("No blob provider {} for deletion candidate {}", provider_id, key);
                    report.missing_provider += 1;
                    continue;
                }
                Err(e) => {
                    error!("Cannot load blob provider {}: {}", provider_id, e);
                    report.failed += 1;
                    continue;
                }
            };
            let store = match provider.blob_store() {
                Ok(store) => store,
                Err(e) => {
                    error!("Blob provider {} has no store: {}", provider_id, e);
                    report.failed += 1;
                    continue;
                }
            };
            match store.is_retained(key).await {
                Ok(false) => {}
                Ok(true) => {
                    debug!("Keeping retained blob {}:{}", provider_id, key);
                    report.retained += 1;
                    continue;
                }
                Err(e) => {
                    error!("Cannot read retention of {}:{}: {}", provider_id, key, e);
                    report.failed += 1;
                    continue;
                }
            }

            // Claim before deleting: a tombstone rather than a removal so a
            // concurrent sweeper re-reading the candidate sees it as gone.
            self.candidates
                .put_with_ttl(&candidate, None, tombstone_ttl)
                .await?;
            match store.delete_blob(key).await {
                Ok(()) => {
                    counter!(BLOBS_DELETED_TOTAL, "path" => "sweep").increment(1);
                    debug!("Deleted blob {}:{}", provider_id, key);
                    report.deleted += 1;
                }
                Err(e) => {
                    error!("Failed to delete blob {}:{}: {}", provider_id, key, e);
                    self.candidates.put(&candidate, Some(marked)).await?;
                    report.failed += 1;
                }
            }
        }

        report.record_metrics();
        info!(
            "Sweep finished: scanned={} deleted={} within_grace={} already_claimed={} retained={} missing_provider={} failed={}",
            report.scanned,
            report.deleted,
            report.within_grace,
            report.already_claimed,
            report.retained,
            report.missing_provider,
            report.failed
        );
        Ok(report)
    }

    /// React to property changes on `doc`. When a changed path feeds a
    /// dispatch rule, every attachment is re-dispatched and the ones whose
    /// target changed are copied to their new provider, with the old copy
    /// marked for deletion unless both providers hold it in one store under
    /// the same key. Returns the rewritten blobs.
    pub async fn notify_change(
        &self,
        doc: &mut dyn ContentObject,
        changed: &[String],
    ) -> BlobResult<Vec<ManagedBlob>> {
        let attachments = doc.blob_attachments();
        let blob_changed = self.dispatcher.uses_blob_properties()
            && changed
                .iter()
                .any(|path| attachments.iter().any(|(xpath, _)| xpath == path));
        if !self.dispatcher.depends_on(changed) && !blob_changed {
            return Ok(Vec::new());
        }

        let mut moved = Vec::new();
        for (xpath, blob) in attachments {
            let dispatch = self.dispatcher.resolve_provider(&*doc, &blob.info, &xpath);
            if dispatch.provider_id == blob.provider_id {
                continue;
            }

            let source = self
                .registry
                .get_provider(&blob.provider_id)
                .await?
                .ok_or_else(|| BlobError::UnknownProvider {
                    provider_id: blob.provider_id.clone(),
                })?;
            let target = self
                .registry
                .provider_for(&dispatch, &self.namespace_template)
                .await?;
            let source_store = source.blob_store()?;
            let target_store = target.blob_store()?;
            let new_key = target_store
                .copy_blob(source_store.as_ref(), &blob.key)
                .await?;
            // Providers sharing one physical store keep the same bytes under
            // the same key; the old reference is not garbage.
            let shared = new_key == blob.key
                && target_store.copy_blob_is_optimized(source_store.as_ref());

            let new_blob = ManagedBlob::new(&dispatch.provider_id, new_key, blob.info.clone());
            doc.set_blob(&xpath, new_blob.clone());
            counter!(BLOBS_MOVED_TOTAL).increment(1);
            info!(
                "Moved blob at {} of {} from {} to {}",
                xpath,
                doc.id(),
                blob.provider_id,
                dispatch.provider_id
            );

            self.events.publish(BlobEvent::Moved {
                repository: doc.repository_name().to_string(),
                object_id: doc.id().to_string(),
                xpath: xpath.clone(),
                from: blob.clone(),
                to: new_blob.clone(),
            });
            if !shared {
                self.mark_for_deletion(&blob.provider_id, &blob.key).await?;
                self.events.publish(BlobEvent::DeletionCandidate {
                    repository: doc.repository_name().to_string(),
                    object_id: doc.id().to_string(),
                    xpath,
                    blob,
                });
            }
            moved.push(new_blob);
        }
        Ok(moved)
    }

    /// Mark the blobs of a document about to be removed. Returns how many
    /// candidates were recorded.
    ///
    /// When the repository cannot enumerate blob keys, only the main
    /// attachment of a record whose provider is in record mode is handled.
    pub async fn notify_before_remove(
        &self,
        principal: &Principal,
        doc: &dyn ContentObject,
    ) -> BlobResult<usize> {
        let attachments = if doc.enumerates_blob_keys() {
            doc.blob_attachments()
        } else {
            match self.legacy_record_attachment(doc).await? {
                Some(attachment) => vec![attachment],
                None => return Ok(0),
            }
        };

        // Refuse the whole removal before marking anything.
        let mut overridden = Vec::with_capacity(attachments.len());
        for (xpath, _) in &attachments {
            overridden.push(check_deletable(principal, doc, xpath)?);
        }

        for ((xpath, blob), overridden) in attachments.iter().zip(overridden) {
            if overridden {
                self.release_store_retention(blob).await?;
            }
            self.mark_for_deletion(&blob.provider_id, &blob.key).await?;
            self.events.publish(BlobEvent::DeletionCandidate {
                repository: doc.repository_name().to_string(),
                object_id: doc.id().to_string(),
                xpath: xpath.clone(),
                blob: blob.clone(),
            });
        }
        Ok(attachments.len())
    }

    /// Delete the blob at `xpath` of `doc` right away, after the retention
    /// gate. Any pending candidate for it is cleared.
    pub async fn delete_record_blob(
        &self,
        principal: &Principal,
        doc: &dyn ContentObject,
        xpath: &str,
    ) -> BlobResult<ManagedBlob> {
        let blob = doc.blob(xpath).ok_or_else(|| BlobError::BlobNotFound {
            object_id: doc.id().to_string(),
            xpath: xpath.to_string(),
        })?;
        check_deletable(principal, doc, xpath)?;

        let provider = self
            .registry
            .get_provider(&blob.provider_id)
            .await?
            .ok_or_else(|| BlobError::UnknownProvider {
                provider_id: blob.provider_id.clone(),
            })?;
        let store = provider.blob_store()?;
        if store.is_retained(&blob.key).await? {
            if !principal.has_capability(Capability::DeleteUndeletable) {
                warn!(
                    "Refusing deletion of retained blob {}:{} by {}",
                    blob.provider_id, blob.key, principal.name
                );
                return Err(BlobError::RetentionDenied {
                    object_id: doc.id().to_string(),
                    xpath: xpath.to_string(),
                });
            }
            store
                .update_retention(&blob.key, RetentionUpdate::Release)
                .await?;
        }
        store.delete_blob(&blob.key).await?;

        let tombstone_ttl = self.settings().tombstone_ttl;
        self.candidates
            .put_with_ttl(&candidate_key(&blob.provider_id, &blob.key), None, tombstone_ttl)
            .await?;
        counter!(BLOBS_DELETED_TOTAL, "path" => "record").increment(1);
        info!(
            "Deleted blob at {} of {} ({}:{})",
            xpath,
            doc.id(),
            blob.provider_id,
            blob.key
        );
        Ok(blob)
    }

    async fn legacy_record_attachment(
        &self,
        doc: &dyn ContentObject,
    ) -> BlobResult<Option<(String, ManagedBlob)>> {
        if !doc.is_record() {
            return Ok(None);
        }
        let xpath = doc.main_blob_xpath().to_string();
        let Some(blob) = doc.blob(&xpath) else {
            return Ok(None);
        };
        match self.registry.get_provider(&blob.provider_id).await? {
            Some(provider) if provider.is_record_mode() => Ok(Some((xpath, blob))),
            _ => Ok(None),
        }
    }

    async fn release_store_retention(&self, blob: &ManagedBlob) -> BlobResult<()> {
        let Some(provider) = self.registry.get_provider(&blob.provider_id).await? else {
            return Ok(());
        };
        let store = provider.blob_store()?;
        if store.is_retained(&blob.key).await? {
            store
                .update_retention(&blob.key, RetentionUpdate::Release)
                .await?;
        }
        Ok(())
    }
}

fn candidate_key(provider_id: &str, key: &str) -> String {
    format!("{provider_id}:{key}")
}
