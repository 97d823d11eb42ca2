//! blobkeeper: blob provider dispatch and deletion garbage collection.
//!
//! `check` validates a configuration, `sweep` runs one deletion sweep, and
//! `run` sweeps periodically until SIGTERM/SIGINT. A sweep interrupted by
//! shutdown leaves its remaining candidates for the next run.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use blobkeeper::config::{Config, LoggingConfig};
use blobkeeper::manager::BlobManager;
use clap::{Parser, Subcommand};
use tracing::{error, info};

/// Command-line arguments for blobkeeper.
#[derive(Parser, Debug)]
#[command(
    name = "blobkeeper",
    version,
    about = "Blob provider dispatch and deletion sweeper"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "blobkeeper.example.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the configuration and print the resulting setup as JSON.
    Check,
    /// Run a single deletion sweep and print its report as JSON.
    Sweep {
        /// Override the configured grace delay, in seconds.
        #[arg(long)]
        grace_seconds: Option<u64>,
    },
    /// Sweep on the configured interval until interrupted.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = blobkeeper::config::load_config(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    if config.observability.metrics {
        let listen = config
            .observability
            .metrics_listen
            .as_deref()
            .map(str::parse::<SocketAddr>)
            .transpose()
            .context("invalid observability.metrics_listen")?;
        blobkeeper::metrics::init_metrics(listen)?;
        blobkeeper::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let manager = BlobManager::from_config(&config).await?;

    let result = match cli.command {
        Command::Check => check(&manager).await,
        Command::Sweep { grace_seconds } => sweep_once(&manager, grace_seconds).await,
        Command::Run => run(&manager, &config).await,
    };

    manager.shutdown().await;
    result
}

async fn check(manager: &BlobManager) -> anyhow::Result<()> {
    let summary = manager.summary().await;
    for id in &summary.providers {
        manager
            .registry()
            .get_provider(id)
            .await
            .with_context(|| format!("provider {id} failed to initialize"))?;
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn sweep_once(manager: &BlobManager, grace_seconds: Option<u64>) -> anyhow::Result<()> {
    let report = match grace_seconds {
        Some(seconds) => {
            manager
                .lifecycle()
                .sweep_and_delete(Duration::from_secs(seconds))
                .await?
        }
        None => manager.lifecycle().sweep().await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(manager: &BlobManager, config: &Config) -> anyhow::Result<()> {
    let period = config.lifecycle.sweep_interval();
    info!("Sweeping deletion candidates every {:?}", period);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = manager.lifecycle().sweep().await {
                    error!("Sweep failed: {}", e);
                }
            }
            _ = &mut shutdown => break,
        }
    }
    info!("blobkeeper shut down");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
