//! blobkeeper library: blob provider dispatch and deletion lifecycle.
//!
//! A content repository hands blobs to a [`manager::BlobManager`], which
//! picks a provider per blob through ordered dispatch rules, builds
//! providers lazily from named descriptors, and garbage-collects blobs that
//! lost their reference after a grace delay. Retained and legally held
//! blobs are never deleted without an explicit capability.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod errors;
pub mod kv;
pub mod lifecycle;
pub mod manager;
pub mod metrics;
pub mod provider;
pub mod storage;

pub use dispatch::{BlobDispatcher, Dispatch};
pub use document::{BlobInfo, ContentObject, ManagedBlob, Principal, PropertyValue};
pub use errors::{BlobError, BlobResult};
pub use lifecycle::{BlobEvent, DeletionLifecycle, KeyReplacementLedger, SweepReport};
pub use manager::BlobManager;
pub use provider::registry::ProviderRegistry;
