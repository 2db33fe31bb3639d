//! Daemon health reporting.
//!
//! The daemon drives a single aggregation pipeline, so its report is the
//! pipeline status plus the counters an operator needs to judge it.

use serde::Serialize;

use stackfold_aggregator::DeliveryStatsSnapshot;
use stackfold_core::pipeline::HealthStatus;

/// Health report for the running daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Pipeline health status.
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Sources with a live aggregator.
    pub active_sources: usize,
    /// Lines routed into the registry.
    pub routed: u64,
    /// Messages delivered by the sink.
    pub delivered: u64,
    /// Messages the sink failed to deliver.
    pub failed: u64,
    /// Messages dropped because the delivery queue was full.
    pub dropped: u64,
}

impl DaemonHealth {
    /// Assemble a report from pipeline state.
    pub fn new(
        status: HealthStatus,
        uptime_secs: u64,
        active_sources: usize,
        routed: u64,
        stats: DeliveryStatsSnapshot,
    ) -> Self {
        Self {
            status,
            uptime_secs,
            active_sources,
            routed,
            delivered: stats.delivered,
            failed: stats.failed,
            dropped: stats.dropped,
        }
    }

    /// Log the report at a level matching its status.
    pub fn log(&self) {
        match &self.status {
            HealthStatus::Healthy => tracing::debug!(
                active_sources = self.active_sources,
                routed = self.routed,
                delivered = self.delivered,
                "pipeline healthy"
            ),
            HealthStatus::Degraded(reason) => tracing::warn!(
                reason = %reason,
                dropped = self.dropped,
                failed = self.failed,
                "pipeline degraded"
            ),
            HealthStatus::Unhealthy(reason) => tracing::error!(
                reason = %reason,
                "pipeline unhealthy"
            ),
        }
    }
}
