//! Pipeline orchestration -- assembly, input wiring, and lifecycle management.
//!
//! The [`Orchestrator`] loads configuration, builds the aggregation pipeline
//! and its delivery sink, feeds it from stdin and runs until a shutdown
//! trigger fires.
//!
//! # Shutdown Triggers
//!
//! - `SIGTERM` (from systemd, Docker, or `kill`)
//! - `SIGINT` (Ctrl+C)
//! - EOF on the input stream
//!
//! On any trigger the collector stops reading, buffered lines are routed,
//! every pending group is flushed and the sink is drained before `run`
//! returns.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;

use stackfold_aggregator::{
    AggregationPipeline, AggregationPipelineBuilder, AggregatorConfig, CollectStats,
    CollectorConfig, LineCollector, SinkConfig,
};
use stackfold_core::config::StackfoldConfig;
use stackfold_core::metrics as m;
use stackfold_core::pipeline::{DeliverySink, Pipeline};

use crate::health::DaemonHealth;
use crate::metrics_server;

/// Interval between periodic pipeline health checks.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between uptime gauge updates.
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: StackfoldConfig,
    /// The aggregation pipeline.
    pipeline: AggregationPipeline,
    /// Input decoding settings.
    collector: LineCollector,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read, parsed or
    /// validated, or if the pipeline fails to build.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = StackfoldConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration, using the sink the
    /// `[sink]` section describes.
    pub fn build_from_config(config: StackfoldConfig) -> Result<Self> {
        let sink_config = SinkConfig::from_core(&config.sink)
            .map_err(|e| anyhow::anyhow!("invalid sink config: {}", e))?;
        tracing::info!(
            transport = %sink_config.transport,
            address = %sink_config.address,
            "delivery sink selected"
        );
        let sink = stackfold_aggregator::build_sink(&sink_config);
        Self::build_with_sink(config, sink)
    }

    /// Build from an already-loaded configuration with an explicit sink.
    pub fn build_with_sink(config: StackfoldConfig, sink: Box<dyn DeliverySink>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let collector_config = CollectorConfig::from_core(&config.input)
            .map_err(|e| anyhow::anyhow!("invalid input config: {}", e))?;

        let pipeline = AggregationPipelineBuilder::new()
            .config(AggregatorConfig::from_core(&config.aggregator))
            .sink(sink)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build aggregation pipeline: {}", e))?;

        tracing::info!(
            input_format = ?collector_config.format,
            idle_timeout_ms = config.aggregator.idle_timeout_ms,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            pipeline,
            collector: LineCollector::new(collector_config),
            start_time: Instant::now(),
        })
    }

    /// Run with stdin as input until a signal or EOF.
    pub async fn run(&mut self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let signal = wait_for_shutdown_signal()?;
        self.run_until(stdin, signal).await?;
        Ok(())
    }

    /// Run with `input` until `shutdown` resolves or the input reaches EOF.
    ///
    /// Returns the collector statistics.
    pub async fn run_until<R, F>(&mut self, input: R, shutdown: F) -> Result<CollectStats>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        F: Future<Output = &'static str>,
    {
        self.pipeline
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start aggregation pipeline: {}", e))?;

        let ingress = self
            .pipeline
            .ingress()
            .ok_or_else(|| anyhow::anyhow!("pipeline ingress unavailable"))?;

        let cancel = CancellationToken::new();
        let collector = self.collector.clone();
        let collector_cancel = cancel.child_token();
        let mut collector_task =
            tokio::spawn(async move { collector.run(input, ingress, collector_cancel).await });

        let uptime_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, cancel.child_token()));

        let mut health_interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        health_interval.tick().await;

        tokio::pin!(shutdown);
        tracing::info!("stackfold-daemon running");

        let mut collected = None;
        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    tracing::info!(signal = signal, "shutdown signal received");
                    break;
                }
                result = &mut collector_task => {
                    collected = Some(result);
                    tracing::info!("input closed, shutting down");
                    break;
                }
                _ = health_interval.tick() => {
                    self.health().await.log();
                }
            }
        }

        cancel.cancel();
        let collected = match collected {
            Some(result) => result,
            None => collector_task.await,
        };
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        let stop_result = self.pipeline.stop().await;

        let stats = match collected {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "line collector failed");
                CollectStats::default()
            }
            Err(e) => {
                tracing::error!(error = %e, "line collector task panicked");
                CollectStats::default()
            }
        };

        stop_result.map_err(|e| anyhow::anyhow!("failed to stop aggregation pipeline: {}", e))?;
        tracing::info!(
            forwarded = stats.forwarded,
            skipped = stats.skipped,
            blank = stats.blank,
            "stackfold-daemon shut down"
        );
        Ok(stats)
    }

    /// Current health report.
    pub async fn health(&self) -> DaemonHealth {
        let uptime_secs = self.start_time.elapsed().as_secs();
        if self.config.metrics.enabled {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth::new(
            self.pipeline.health_check().await,
            uptime_secs,
            self.pipeline.active_sources(),
            self.pipeline.routed_count(),
            self.pipeline.delivery_stats(),
        )
    }

    /// The loaded configuration.
    pub fn config(&self) -> &StackfoldConfig {
        &self.config
    }

    /// The aggregation pipeline.
    pub fn pipeline(&self) -> &AggregationPipeline {
        &self.pipeline
    }
}

/// Install SIGTERM/SIGINT handlers and return a future that resolves with
/// the name of the first signal received.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
fn wait_for_shutdown_signal() -> Result<impl Future<Output = &'static str>> {
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

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(
    start_time: Instant,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
                () = cancel.cancelled() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
