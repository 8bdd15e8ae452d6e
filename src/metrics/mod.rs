//! Prometheus-style metrics exposition (spec.md §4.8). Grounded in
//! `src/nwws/metrics/exporters.py`'s delta-publishing idea, rebuilt on
//! top of `metrics` + `metrics-exporter-prometheus`'s own HTTP listener
//! rather than a hand-rolled scrape server.

pub mod exporter;

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::task::JoinHandle;

use crate::config::MetricsConfig;
use crate::stats::Aggregator;

pub use exporter::MetricsExporter;

/// Installs the Prometheus recorder and HTTP listener, then spawns the
/// periodic snapshot-to-delta task. Returns `None` (and logs) if metrics
/// are disabled or the listener fails to bind.
pub fn spawn(aggregator: Arc<Aggregator>, config: &MetricsConfig) -> Option<JoinHandle<()>> {
    if !config.enabled {
        return None;
    }

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], config.port).into();
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        log::error!("failed to start metrics exporter on {}: {}", addr, e);
        return None;
    }

    let interval_secs = config.update_interval_secs;
    Some(tokio::spawn(async move {
        let exporter = MetricsExporter::new();
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            exporter.export(&aggregator.snapshot());
        }
    }))
}
