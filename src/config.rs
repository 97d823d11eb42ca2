//! Configuration loading and types for blobkeeper.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct. Each subsection governs a different part of the
//! system: provider descriptors, dispatch rules, the deletion lifecycle,
//! logging and metrics.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::dispatch::{RuleConfig, DEFAULT_RULE};
use crate::lifecycle::LifecycleSettings;
use crate::provider::ProviderDescriptor;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Provider descriptors, registered in order.
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,

    /// Provider selection rules.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Deletion candidates, sweeps and key replacement.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Ordered rules; the first match wins. An empty list dispatches by
    /// repository name.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Descriptor cloned for repositories that have no provider of their
    /// own when dispatching by repository name.
    #[serde(default = "default_namespace_template")]
    pub namespace_template: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            namespace_template: default_namespace_template(),
        }
    }
}

/// Deletion lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Minimum age of a deletion candidate before a sweep deletes it.
    #[serde(default = "default_grace_delay")]
    pub grace_delay_seconds: u64,

    /// How long an old key keeps resolving to its replacement.
    #[serde(default = "default_key_replacement_ttl")]
    pub key_replacement_ttl_seconds: u64,

    /// How long claimed-candidate tombstones are kept.
    #[serde(default = "default_tombstone_ttl")]
    pub tombstone_ttl_seconds: u64,

    /// Interval between sweeps in `run` mode.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Key-value store for candidates and replacements: `memory` or `sqlite`.
    #[serde(default = "default_lifecycle_store")]
    pub store: String,

    /// Database file when `store` is `sqlite`.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_delay_seconds: default_grace_delay(),
            key_replacement_ttl_seconds: default_key_replacement_ttl(),
            tombstone_ttl_seconds: default_tombstone_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            store: default_lifecycle_store(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

impl LifecycleConfig {
    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            grace_delay: Duration::from_secs(self.grace_delay_seconds),
            tombstone_ttl: Duration::from_secs(self.tombstone_ttl_seconds),
        }
    }

    pub fn key_replacement_ttl(&self) -> Duration {
        Duration::from_secs(self.key_replacement_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Address for the `/metrics` HTTP listener, e.g. `0.0.0.0:9000`.
    /// Unset means metrics are recorded but not served.
    #[serde(default)]
    pub metrics_listen: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_listen: None,
        }
    }
}

// -- Default value functions -------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_namespace_template() -> String {
    DEFAULT_RULE.to_string()
}

fn default_grace_delay() -> u64 {
    3600
}

fn default_key_replacement_ttl() -> u64 {
    3600
}

fn default_tombstone_ttl() -> u64 {
    86400
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_lifecycle_store() -> String {
    "memory".to_string()
}

fn default_sqlite_path() -> String {
    "./data/blobkeeper.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
