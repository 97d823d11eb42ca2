//! Blob lifecycle: deletion candidates, grace-delayed sweeps, key
//! replacement and the retention gate.
//!
//! Observers learn about lifecycle decisions through [`BlobEvent`]s
//! published on a broadcast channel. Publishing never blocks and never
//! fails when nobody is listening.

pub mod deletion;
pub mod replacement;
pub mod retention;

pub use deletion::{DeletionLifecycle, LifecycleSettings, SweepReport};
pub use replacement::KeyReplacementLedger;
pub use retention::check_deletable;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::document::ManagedBlob;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BlobEvent {
    /// `blob` is no longer referenced at `xpath` and may be deletable.
    DeletionCandidate {
        repository: String,
        object_id: String,
        xpath: String,
        blob: ManagedBlob,
    },
    /// The blob at `xpath` was rewritten into another provider.
    Moved {
        repository: String,
        object_id: String,
        xpath: String,
        from: ManagedBlob,
        to: ManagedBlob,
    },
}

/// Emission point for [`BlobEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BlobEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BlobEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: BlobEvent) {
        // Err only means there are no receivers.
        let _ = self.sender.send(event);
    }
}
