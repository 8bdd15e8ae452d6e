//! The statistics state shape (spec.md §4.7) and its read-only,
//! deep-copied [`Snapshot`]. Grounded in `stats/models.py`'s
//! `ApplicationStats`/`ConnectionStats`/`MessageStats`/`OutputHandlerStats`
//! and `stats/collector.py`'s `get_stats`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Connection-related counters and gauges.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub total_connections: u64,
    pub total_disconnections: u64,
    pub reconnect_attempts: u64,
    pub auth_failures: u64,
    pub connection_errors: u64,
    pub outstanding_pings: u64,
    pub last_ping_sent: Option<DateTime<Utc>>,
    pub last_pong_received: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub is_connected: bool,
}

/// Message-related counters and label breakdowns.
#[derive(Debug, Clone, Default)]
pub struct MessageStats {
    pub total_received: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_published: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_groupchat_message_time: Option<DateTime<Utc>>,
    pub by_wmo: HashMap<String, u64>,
    pub by_source: HashMap<String, u64>,
    pub by_afos: HashMap<String, u64>,
    pub by_error_kind: HashMap<String, u64>,
}

/// Per-sink counters (spec.md §3 `SinkInstance`).
#[derive(Debug, Clone)]
pub struct SinkStats {
    pub handler_type: String,
    pub total_published: u64,
    pub total_failed: u64,
    pub connection_errors: u64,
    pub is_connected: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub last_publish_time: Option<DateTime<Utc>>,
}

impl SinkStats {
    pub(crate) fn new(handler_type: String) -> Self {
        Self {
            handler_type,
            total_published: 0,
            total_failed: 0,
            connection_errors: 0,
            is_connected: false,
            connected_at: None,
            disconnected_at: None,
            last_publish_time: None,
        }
    }
}

/// Everything the aggregator mutates, held under one lock.
#[derive(Debug, Clone)]
pub(crate) struct StatisticsState {
    pub session_start_time: DateTime<Utc>,
    pub connection: ConnectionStats,
    pub messages: MessageStats,
    pub sinks: HashMap<String, SinkStats>,
}

impl StatisticsState {
    pub(crate) fn new() -> Self {
        Self {
            session_start_time: Utc::now(),
            connection: ConnectionStats::default(),
            messages: MessageStats::default(),
            sinks: HashMap::new(),
        }
    }
}

/// A deep-copied read of [`StatisticsState`], safe to hold without the
/// aggregator's lock. Derived quantities are computed here, never stored.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub session_start_time: DateTime<Utc>,
    pub connection: ConnectionStats,
    pub messages: MessageStats,
    pub sinks: HashMap<String, SinkStats>,
}

impl Snapshot {
    pub(crate) fn from_state(state: &StatisticsState) -> Self {
        Self {
            session_start_time: state.session_start_time,
            connection: state.connection.clone(),
            messages: state.messages.clone(),
            sinks: state.sinks.clone(),
        }
    }

    /// `total_processed / total_received`, 0 when there have been no
    /// messages yet.
    pub fn message_success_rate(&self) -> f64 {
        ratio(self.messages.total_processed, self.messages.total_received)
    }

    /// `total_failed / total_received`, 0 when there have been no messages
    /// yet.
    pub fn message_error_rate(&self) -> f64 {
        ratio(self.messages.total_failed, self.messages.total_received)
    }

    /// `published / (published + failed)` for one sink, 0 if the sink is
    /// unknown or has never been asked to publish.
    pub fn sink_success_rate(&self, name: &str) -> f64 {
        match self.sinks.get(name) {
            Some(sink) => ratio(sink.total_published, sink.total_published + sink.total_failed),
            None => 0.0,
        }
    }

    /// Wall time since the aggregator was created.
    pub fn uptime(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.session_start_time)
            .to_std()
            .unwrap_or_default()
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
