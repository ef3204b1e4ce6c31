//! Fan-out worker service for the timeline pipeline.
//!
//! Connects to Dragonfly for the follower graph and timelines, subscribes a
//! sharded worker pool to the NATS post subject, and fans every post out
//! to its author's followers until interrupted.
//!
//! # Architecture
//!
//! ```text
//! NATS (timeline.posts) --> WorkerPool --> Dragonfly (followers:*, timeline:*)
//!                               |
//!                               +--> delivery reports --> log
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use timeline_bus::{EventBus, NatsBus};
use timeline_fanout::{BusKind, TimelineConfig, WorkerPool};
use timeline_store::DragonflyStore;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Config file read when `TIMELINE_CONFIG` is not set.
const DEFAULT_CONFIG_PATH: &str = "timeline-config.yaml";

/// Application entry point.
///
/// Loads configuration, initializes logging, connects to Dragonfly and the
/// event bus, then runs the worker pool until Ctrl-C.
///
/// # Errors
///
/// Returns an error if configuration is invalid or a backing service
/// cannot be reached at startup.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("TIMELINE_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let (config, from_file) = load_config(&config_path)?;

    // Initialize structured logging; RUST_LOG wins over the config level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("timeline-service starting");
    if from_file {
        info!(path = %config_path.display(), "configuration loaded");
    } else {
        info!(path = %config_path.display(), "config file not found, using defaults");
    }

    ensure_remote_bus(&config)?;

    let store = Arc::new(
        DragonflyStore::connect(
            &config.infrastructure.dragonfly_url,
            config.timeline.max_len,
        )
        .await
        .context("failed to connect to Dragonfly")?,
    );

    let bus = NatsBus::connect(
        &config.infrastructure.nats_url,
        &config.infrastructure.subject,
    )
    .await
    .context("failed to connect to NATS")?;

    run(&bus, store, &config).await
}

/// Refuse a `local` bus: nothing in this process publishes to it.
fn ensure_remote_bus(config: &TimelineConfig) -> anyhow::Result<()> {
    if config.infrastructure.bus == BusKind::Local {
        anyhow::bail!(
            "infrastructure.bus is `local`, but this service has no in-process \
             publishers; use `nats` or embed the worker pool next to its publishers"
        );
    }
    Ok(())
}

/// Read the config file if it exists, otherwise start from defaults.
///
/// Returns the config and whether it came from the file.
fn load_config(path: &Path) -> anyhow::Result<(TimelineConfig, bool)> {
    if path.exists() {
        let config = TimelineConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        Ok((config, true))
    } else {
        let config = TimelineConfig::parse("").context("invalid configuration")?;
        Ok((config, false))
    }
}

/// Run the worker pool on `bus` until Ctrl-C, then drain and stop it.
async fn run<B: EventBus>(
    bus: &B,
    store: Arc<DragonflyStore>,
    config: &TimelineConfig,
) -> anyhow::Result<()> {
    let mut pool = WorkerPool::start(
        bus,
        Arc::clone(&store),
        store,
        &config.fanout.pool_config(),
    )
    .await
    .context("failed to start worker pool")?;

    let reporter = pool.take_reports().map(|mut reports| {
        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                if report.is_complete() {
                    debug!(
                        sequence = report.sequence,
                        delivered = report.delivered,
                        "post delivered"
                    );
                } else {
                    warn!(
                        sequence = report.sequence,
                        author = %report.author_id,
                        outcome = ?report.outcome,
                        followers = report.followers,
                        delivered = report.delivered,
                        failed = ?report.failed,
                        error = report.error.as_deref().unwrap_or(""),
                        "post not fully delivered"
                    );
                }
            }
        })
    });

    info!(workers = pool.worker_count(), "timeline-service running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
    info!(stats = ?pool.stats(), "shutdown requested");

    pool.shutdown().await;
    if let Some(reporter) = reporter {
        reporter.await.context("report logger panicked")?;
    }

    info!("timeline-service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_nats() {
        assert!(ensure_remote_bus(&TimelineConfig::default()).is_ok());
    }

    #[test]
    fn local_bus_is_refused() {
        let mut config = TimelineConfig::default();
        config.infrastructure.bus = BusKind::Local;
        assert!(ensure_remote_bus(&config).is_err());
    }
}
