//! Prometheus metrics exporter.

use std::net::SocketAddr;

#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

/// Prometheus exporter configuration.
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Listen address.
    pub listen: SocketAddr,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: ([127, 0, 0, 1], 9464).into(),
        }
    }
}

/// Installs the Prometheus exporter as the global metrics recorder.
#[cfg(feature = "prometheus")]
pub fn init_prometheus(config: &PrometheusConfig) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()?;

    tracing::info!("Prometheus metrics server listening on {}", config.listen);
    Ok(())
}

/// No-op when the `prometheus` feature is disabled.
#[cfg(not(feature = "prometheus"))]
pub fn init_prometheus(config: &PrometheusConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::debug!(
        listen = %config.listen,
        "prometheus feature disabled, exporter not installed"
    );
    Ok(())
}
