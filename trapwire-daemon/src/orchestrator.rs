//! Module orchestration -- assembly, wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `trapwire-daemon`.
//! It validates configuration, opens the event store, creates the live
//! channel, builds the ingest pipeline and the live feed, and runs the
//! main loop until a shutdown signal arrives.
//!
//! # Startup Order (consumers before producers)
//!
//! 1. Live feed (subscribers can attach before the first event)
//! 2. Ingest pipeline (primes watched files, starts watchers)
//!
//! # Shutdown Order
//!
//! 1. Ingest pipeline (drain queued lines, final flush, publish)
//! 2. Live feed (close subscriber connections)
//!
//! The pipeline goes first so that events from the final flush still
//! reach connected subscribers.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;

use trapwire_core::config::TrapwireConfig;
use trapwire_core::metrics as m;
use trapwire_core::pipeline::{HealthStatus, Pipeline};
use trapwire_ingest::{
    IngestConfig, IngestHandle, IngestPipeline, IngestPipelineBuilder, LiveChannel, PipelineStats,
    open_store,
};

use crate::health::{DaemonHealth, ModuleHealth, aggregate_status};
use crate::live_feed::LiveFeed;
use crate::metrics_server;

/// Interval between uptime gauge refreshes.
const UPTIME_REFRESH: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: TrapwireConfig,
    /// Ingest pipeline (absent when `[ingest] enabled = false`).
    ingest: Option<IngestPipeline>,
    /// Submission handle for programmatic ingestion.
    handle: Option<IngestHandle>,
    /// Shared fan-out channel (also held by the pipeline and the feed).
    live: LiveChannel,
    /// TCP transport for the live channel (absent when `[live] enabled = false`).
    live_feed: Option<LiveFeed>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load `trapwire.toml`, apply environment overrides, and build.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or parsed
    /// - Configuration validation fails
    /// - The store cannot be opened or the pipeline cannot be built
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = TrapwireConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    pub async fn build_from_config(config: TrapwireConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Recorder first so that module construction is already measured.
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            record_daemon_metrics();
        }

        let live = LiveChannel::new(config.live.subscriber_capacity);

        let (ingest, handle) = if config.ingest.enabled {
            tracing::info!(store = %config.store.kind, "opening event store");
            let store = open_store(&config.store)
                .await
                .map_err(|e| anyhow::anyhow!("failed to open event store: {}", e))?;

            let (pipeline, handle) = IngestPipelineBuilder::new()
                .config(IngestConfig::from_core(&config.ingest))
                .store(store)
                .live_channel(live.clone())
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build ingest pipeline: {}", e))?;
            tracing::info!(
                sources = config.ingest.sources.len(),
                batch_size = config.ingest.batch_size,
                "ingest pipeline initialized"
            );
            (Some(pipeline), Some(handle))
        } else {
            tracing::info!("ingest disabled");
            (None, None)
        };

        let live_feed = config
            .live
            .enabled
            .then(|| LiveFeed::new(&config.live, live.clone()));

        Ok(Self {
            config,
            ingest,
            handle,
            live,
            live_feed,
            start_time: Instant::now(),
        })
    }

    /// Start the live feed and then the ingest pipeline.
    ///
    /// If the pipeline fails to start the live feed is stopped again.
    pub async fn start(&mut self) -> Result<()> {
        if let Some(feed) = self.live_feed.as_mut() {
            feed.start().await?;
        }

        if let Some(pipeline) = self.ingest.as_mut() {
            if let Err(e) = pipeline.start().await {
                tracing::error!(error = %e, "ingest pipeline failed to start, rolling back");
                if let Some(feed) = self.live_feed.as_mut() {
                    feed.stop().await;
                }
                return Err(anyhow::anyhow!("failed to start ingest pipeline: {}", e));
            }
        }

        tracing::info!("trapwire-daemon running");
        Ok(())
    }

    /// Run until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        let signal = shutdown_signal()?;
        self.run_until(signal).await
    }

    /// Start all modules, run the main loop until `shutdown` resolves,
    /// then stop everything.
    ///
    /// The main loop logs aggregated health every
    /// `general.health_log_interval_secs` and refreshes the uptime gauge.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = &'static str>,
    {
        self.start().await?;

        let health_every = Duration::from_secs(self.config.general.health_log_interval_secs.max(1));
        let mut health_tick = tokio::time::interval(health_every);
        health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it.
        health_tick.tick().await;

        let mut uptime_tick = tokio::time::interval(UPTIME_REFRESH);
        uptime_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        let signal = loop {
            tokio::select! {
                signal = &mut shutdown => break signal,
                _ = health_tick.tick() => self.log_health().await,
                _ = uptime_tick.tick() => {
                    if self.config.metrics.enabled {
                        record_uptime(self.start_time);
                    }
                }
            }
        };
        tracing::info!(signal = signal, "shutdown signal received");

        self.shutdown().await
    }

    /// Stop the pipeline (final flush) and then the live feed.
    pub async fn shutdown(&mut self) -> Result<()> {
        let mut result = Ok(());

        if let Some(pipeline) = self.ingest.as_mut() {
            if pipeline.state_name() == "running" {
                tracing::info!("stopping ingest pipeline");
                if let Err(e) = pipeline.stop().await {
                    tracing::error!(error = %e, "failed to stop ingest pipeline");
                    result = Err(anyhow::anyhow!("failed to stop ingest pipeline: {}", e));
                }
            }
        }

        if let Some(feed) = self.live_feed.as_mut() {
            feed.stop().await;
        }

        if let Some(pipeline) = self.ingest.as_ref() {
            let stats = pipeline.stats();
            tracing::info!(
                lines_read = stats.lines_read,
                events_parsed = stats.events_parsed,
                inputs_dropped = stats.inputs_dropped,
                records_stored = stats.records_stored,
                records_rejected = stats.records_rejected,
                batch_failures = stats.batch_failures,
                "trapwire-daemon shut down"
            );
        }

        result
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let ingest_status = match self.ingest.as_ref() {
            Some(pipeline) => pipeline.health_check().await,
            None => HealthStatus::Healthy,
        };
        let feed_status = self
            .live_feed
            .as_ref()
            .map_or(HealthStatus::Healthy, LiveFeed::health);

        let modules = vec![
            ModuleHealth {
                name: "ingest".to_owned(),
                enabled: self.ingest.is_some(),
                status: ingest_status,
            },
            ModuleHealth {
                name: "live-feed".to_owned(),
                enabled: self.live_feed.is_some(),
                status: feed_status,
            },
        ];

        let uptime_secs = self.start_time.elapsed().as_secs();
        if self.config.metrics.enabled {
            record_uptime(self.start_time);
        }

        DaemonHealth {
            status: aggregate_status(&modules),
            uptime_secs,
            modules,
        }
    }

    async fn log_health(&self) {
        let health = self.health().await;
        match &health.status {
            HealthStatus::Healthy => {
                tracing::debug!(uptime_secs = health.uptime_secs, "daemon healthy");
            }
            HealthStatus::Degraded(reason) => {
                tracing::warn!(uptime_secs = health.uptime_secs, reason = %reason, "daemon degraded");
            }
            HealthStatus::Unhealthy(reason) => {
                tracing::error!(uptime_secs = health.uptime_secs, reason = %reason, "daemon unhealthy");
            }
        }
    }

    pub fn config(&self) -> &TrapwireConfig {
        &self.config
    }

    /// Handle for submitting records directly, bypassing watched files.
    pub fn ingest_handle(&self) -> Option<IngestHandle> {
        self.handle.clone()
    }

    pub fn live_channel(&self) -> &LiveChannel {
        &self.live
    }

    /// Bound address of the live feed, once started.
    pub fn live_addr(&self) -> Option<SocketAddr> {
        self.live_feed.as_ref().and_then(LiveFeed::local_addr)
    }

    pub fn stats(&self) -> Option<PipelineStats> {
        self.ingest.as_ref().map(IngestPipeline::stats)
    }
}

/// Install SIGTERM/SIGINT handlers and return a future resolving to the
/// name of the first signal received.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

fn record_daemon_metrics() {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

fn record_uptime(start_time: Instant) {
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
}
