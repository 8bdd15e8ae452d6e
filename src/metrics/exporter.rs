//! Snapshot-to-Prometheus translation (spec.md §4.8).
//!
//! Counters are republished as deltas: the exporter remembers the last
//! integer it handed to the `metrics` crate for each counter key (plain or
//! labeled) and only calls `increment` with the difference, so restarting
//! the exporter task never resets what Prometheus has already scraped.
//! Gauges are set absolutely every tick.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::stats::Snapshot;

pub struct MetricsExporter {
    last_counters: Mutex<HashMap<String, u64>>,
}

impl Default for MetricsExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsExporter {
    pub fn new() -> Self {
        Self {
            last_counters: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes one snapshot's worth of deltas and gauge values.
    pub fn export(&self, snapshot: &Snapshot) {
        self.bump("nwws_connections_total", None, snapshot.connection.total_connections);
        self.bump("nwws_disconnections_total", None, snapshot.connection.total_disconnections);
        self.bump("nwws_reconnect_attempts_total", None, snapshot.connection.reconnect_attempts);
        self.bump("nwws_auth_failures_total", None, snapshot.connection.auth_failures);
        self.bump("nwws_connection_errors_total", None, snapshot.connection.connection_errors);

        self.bump("nwws_messages_received_total", None, snapshot.messages.total_received);
        self.bump("nwws_messages_processed_total", None, snapshot.messages.total_processed);
        self.bump("nwws_messages_failed_total", None, snapshot.messages.total_failed);
        self.bump("nwws_messages_published_total", None, snapshot.messages.total_published);

        for (wmo, count) in &snapshot.messages.by_wmo {
            self.bump("nwws_messages_by_wmo_total", Some(("wmo", wmo)), *count);
        }
        for (source, count) in &snapshot.messages.by_source {
            self.bump("nwws_messages_by_source_total", Some(("source", source)), *count);
        }
        for (afos, count) in &snapshot.messages.by_afos {
            self.bump("nwws_messages_by_afos_total", Some(("afos", afos)), *count);
        }
        for (kind, count) in &snapshot.messages.by_error_kind {
            self.bump("nwws_messages_by_error_kind_total", Some(("error_kind", kind)), *count);
        }

        for (name, sink) in &snapshot.sinks {
            self.bump(
                "nwws_sink_published_total",
                Some(("sink", name)),
                sink.total_published,
            );
            self.bump("nwws_sink_failed_total", Some(("sink", name)), sink.total_failed);
            self.bump(
                "nwws_sink_connection_errors_total",
                Some(("sink", name)),
                sink.connection_errors,
            );
            metrics::gauge!("nwws_sink_connected", "sink" => name.clone())
                .set(if sink.is_connected { 1.0 } else { 0.0 });
        }

        metrics::gauge!("nwws_outstanding_pings").set(snapshot.connection.outstanding_pings as f64);
        metrics::gauge!("nwws_connected").set(if snapshot.connection.is_connected { 1.0 } else { 0.0 });
        metrics::gauge!("nwws_uptime_seconds").set(snapshot.uptime().as_secs_f64());
    }

    fn bump(&self, name: &'static str, label: Option<(&'static str, &str)>, current: u64) {
        let key = match label {
            Some((label_name, label_value)) => format!("{name}\0{label_name}={label_value}"),
            None => name.to_string(),
        };

        let mut last_counters = self.last_counters.lock().expect("metrics exporter lock poisoned");
        let previous = last_counters.entry(key).or_insert(0);
        let delta = current.saturating_sub(*previous);
        *previous = current;
        drop(last_counters);

        if delta == 0 {
            return;
        }

        match label {
            Some((label_name, label_value)) => {
                metrics::counter!(name, label_name => label_value.to_string()).increment(delta);
            }
            None => {
                metrics::counter!(name).increment(delta);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Event, EventBus};
    use crate::stats::Aggregator;

    #[test]
    fn never_reports_a_negative_delta() {
        let bus = EventBus::new();
        let aggregator = Aggregator::new(&bus);
        let exporter = MetricsExporter::new();

        bus.publish(Event::StatsMessageReceived);
        exporter.export(&aggregator.snapshot());

        // A second export with no new events should compute a zero delta,
        // not panic on underflow.
        exporter.export(&aggregator.snapshot());
    }
}
