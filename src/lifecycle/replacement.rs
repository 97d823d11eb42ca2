//! Temporary redirects from old blob keys to their replacements.
//!
//! When content is republished under a new key, readers still holding the
//! old key resolve through this ledger until the entry expires.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::debug;

use crate::errors::BlobResult;
use crate::kv::KeyValueStore;
use crate::metrics::KEY_REPLACEMENTS_TOTAL;

pub struct KeyReplacementLedger {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl KeyReplacementLedger {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `old_key` in `provider_id` is now `new_key`.
    pub async fn remember(&self, provider_id: &str, old_key: &str, new_key: &str) -> BlobResult<()> {
        self.kv
            .put_with_ttl(
                &ledger_key(provider_id, old_key),
                Some(new_key.to_string()),
                self.ttl,
            )
            .await?;
        counter!(KEY_REPLACEMENTS_TOTAL).increment(1);
        debug!("Key {} of {} replaced by {}", old_key, provider_id, new_key);
        Ok(())
    }

    /// The live replacement for `key`, or `key` itself.
    pub async fn resolve(&self, provider_id: &str, key: &str) -> BlobResult<String> {
        Ok(self
            .kv
            .get(&ledger_key(provider_id, key))
            .await?
            .unwrap_or_else(|| key.to_string()))
    }
}

fn ledger_key(provider_id: &str, key: &str) -> String {
    format!("{provider_id}:{key}")
}
