//! Key-value stores with per-key TTL.
//!
//! Deletion candidates and key replacements live in a [`KeyValueStore`].
//! Values are optional: writing `None` leaves a tombstone under the key
//! instead of removing it.

pub mod memory;
pub mod sqlite;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Async key-value contract.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Current value, or `None` if absent, expired, or tombstoned.
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send + '_>>;

    /// Write without expiry. `None` writes a tombstone.
    fn put(
        &self,
        key: &str,
        value: Option<String>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Write with an expiry `ttl` from now.
    fn put_with_ttl(
        &self,
        key: &str,
        value: Option<String>,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Keys that currently hold a value, sorted.
    fn keys(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + '_>>;
}
