//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`
//! to expose the scrape endpoint.
//!
//! # Usage
//!
//! ```ignore
//! let config = MetricsConfig { enabled: true, ..Default::default() };
//! install_metrics_recorder(&config)?;
//! // metrics::counter!() etc. now record to the Prometheus registry
//! ```

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

use stackfold_core::config::MetricsConfig;
use stackfold_core::metrics as m;

/// Resolve the listen socket address from the `[metrics]` section.
///
/// # Errors
///
/// - The endpoint path is not `/metrics` (the exporter serves a single path)
/// - `listen_addr:port` is not a valid socket address
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is currently supported",
            config.endpoint
        ));
    }

    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process. Delivery latency is exported as a histogram
/// with [`m::DELIVERY_DURATION_BUCKETS`].
///
/// # Errors
///
/// - Invalid address or endpoint (see [`listen_addr`])
/// - Socket binding fails or a global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::SINK_DELIVERY_DURATION_SECONDS.to_owned()),
            &m::DELIVERY_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(addr: &str, endpoint: &str) -> MetricsConfig {
        MetricsConfig {
            enabled: true,
            listen_addr: addr.to_owned(),
            port: 9109,
            endpoint: endpoint.to_owned(),
        }
    }

    #[test]
    fn listen_addr_parses_ip_and_port() {
        let addr = listen_addr(&config("127.0.0.1", "/metrics")).unwrap();
        assert_eq!(addr.port(), 9109);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn listen_addr_rejects_bad_ip() {
        assert!(listen_addr(&config("999.1.1.1", "/metrics")).is_err());
    }

    #[test]
    fn listen_addr_rejects_custom_endpoint() {
        let err = listen_addr(&config("127.0.0.1", "/custom")).unwrap_err();
        assert!(err.to_string().contains("/custom"));
    }
}
