//! Prometheus metrics for blobkeeper.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! optionally serving the exposition text over HTTP, and defines the metric
//! name constants used across the crate.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{error, info};

// -- Metric name constants ----------------------------------------------------

/// Providers built and initialized (counter). Labels: kind.
pub const PROVIDERS_INITIALIZED_TOTAL: &str = "blobkeeper_providers_initialized_total";

/// Providers closed (counter).
pub const PROVIDERS_CLOSED_TOTAL: &str = "blobkeeper_providers_closed_total";

/// Blobs written through the manager (counter). Labels: provider.
pub const BLOBS_WRITTEN_TOTAL: &str = "blobkeeper_blobs_written_total";

/// Blobs copied to another provider after a dispatch change (counter).
pub const BLOBS_MOVED_TOTAL: &str = "blobkeeper_blobs_moved_total";

/// Blobs physically deleted (counter). Labels: path (sweep, record).
pub const BLOBS_DELETED_TOTAL: &str = "blobkeeper_blobs_deleted_total";

/// Deletion candidates recorded (counter).
pub const CANDIDATES_MARKED_TOTAL: &str = "blobkeeper_deletion_candidates_marked_total";

/// Completed sweeps (counter).
pub const SWEEPS_TOTAL: &str = "blobkeeper_sweeps_total";

/// Candidates processed by sweeps (counter). Labels: outcome.
pub const SWEEP_CANDIDATES_TOTAL: &str = "blobkeeper_sweep_candidates_total";

/// Key replacements remembered (counter).
pub const KEY_REPLACEMENTS_TOTAL: &str = "blobkeeper_key_replacements_total";

/// Providers currently registered (gauge).
pub const PROVIDERS_REGISTERED: &str = "blobkeeper_providers_registered";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent: later calls
/// return the first handle and ignore `listen`.
///
/// With `listen` set, an exporter task serving `/metrics` is spawned on the
/// current tokio runtime.
pub fn init_metrics(listen: Option<SocketAddr>) -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = match listen {
        None => PrometheusBuilder::new().install_recorder()?,
        Some(addr) => {
            let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    error!("Metrics exporter stopped: {:?}", e);
                }
            });
            info!("Serving Prometheus metrics on {}", addr);
            handle
        }
    };
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(PROVIDERS_INITIALIZED_TOTAL, "Blob providers initialized");
    describe_counter!(PROVIDERS_CLOSED_TOTAL, "Blob providers closed");
    describe_counter!(BLOBS_WRITTEN_TOTAL, "Blobs written by provider");
    describe_counter!(BLOBS_MOVED_TOTAL, "Blobs moved after a dispatch change");
    describe_counter!(BLOBS_DELETED_TOTAL, "Blobs physically deleted");
    describe_counter!(CANDIDATES_MARKED_TOTAL, "Deletion candidates recorded");
    describe_counter!(SWEEPS_TOTAL, "Completed deletion sweeps");
    describe_counter!(
        SWEEP_CANDIDATES_TOTAL,
        "Deletion candidates processed by outcome"
    );
    describe_counter!(KEY_REPLACEMENTS_TOTAL, "Key replacements remembered");
    describe_gauge!(PROVIDERS_REGISTERED, "Blob provider descriptors registered");
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;

    #[test]
    fn test_init_is_idempotent_and_renders() {
        let first = init_metrics(None).unwrap() as *const PrometheusHandle;
        let second = init_metrics(None).unwrap() as *const PrometheusHandle;
        assert_eq!(first, second);

        describe_metrics();
        counter!(SWEEPS_TOTAL).increment(1);
        let text = init_metrics(None).unwrap().render();
        assert!(text.contains(SWEEPS_TOTAL));
    }
}
