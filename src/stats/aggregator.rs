//! The statistics aggregator (spec.md §4.7): subscribes to every bus
//! topic and folds events into [`StatisticsState`] under one lock.
//! Grounded in `stats/collector.py`'s `StatsCollector`, one `on_*` method
//! per topic collapsed into a single `match`.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::bus::{Event, EventBus, Handler, ALL_TOPICS};

use super::snapshot::{Snapshot, SinkStats, StatisticsState};

pub struct Aggregator {
    state: Mutex<StatisticsState>,
}

impl Aggregator {
    /// Subscribes to every topic in the closed set and returns the
    /// aggregator that will fold them into state.
    pub fn new(bus: &EventBus) -> Arc<Self> {
        let aggregator = Arc::new(Self {
            state: Mutex::new(StatisticsState::new()),
        });

        let handler: Handler = {
            let aggregator = aggregator.clone();
            Arc::new(move |event: &Event| aggregator.handle(event))
        };

        for topic in ALL_TOPICS {
            bus.subscribe(*topic, handler.clone());
        }

        aggregator
    }

    fn handle(&self, event: &Event) {
        let mut state = self.state.lock().expect("aggregator lock poisoned");
        match event {
            Event::StatsConnectionAttempt => {}
            Event::XmppConnected => {}
            Event::StatsConnectionEstablished => {
                let now = Utc::now();
                state.connection.connected_at = Some(now);
                state.connection.disconnected_at = None;
                state.connection.total_connections += 1;
                state.connection.is_connected = true;
            }
            Event::XmppDisconnected => {
                let now = Utc::now();
                state.connection.disconnected_at = Some(now);
                state.connection.total_disconnections += 1;
                state.connection.is_connected = false;
            }
            Event::StatsConnectionLost => {
                state.connection.connection_errors += 1;
            }
            Event::StatsConnectionError => {
                state.connection.connection_errors += 1;
            }
            Event::StatsReconnectAttempt => {
                state.connection.reconnect_attempts += 1;
            }
            Event::StatsAuthFailure => {
                state.connection.auth_failures += 1;
            }
            Event::StatsPingSent => {
                state.connection.last_ping_sent = Some(Utc::now());
                state.connection.outstanding_pings += 1;
            }
            Event::StatsPongReceived => {
                state.connection.last_pong_received = Some(Utc::now());
                if state.connection.outstanding_pings > 0 {
                    state.connection.outstanding_pings -= 1;
                }
            }
            Event::StatsMessageReceived => {
                state.messages.total_received += 1;
                state.messages.last_message_time = Some(Utc::now());
            }
            Event::StatsGroupchatMessageReceived => {
                state.messages.last_groupchat_message_time = Some(Utc::now());
            }
            Event::StatsMessageProcessed { source, afos, wmo, product_id: _ } => {
                state.messages.total_processed += 1;
                if !source.is_empty() {
                    *state.messages.by_source.entry(source.clone()).or_insert(0) += 1;
                }
                if !afos.is_empty() {
                    *state.messages.by_afos.entry(afos.clone()).or_insert(0) += 1;
                }
                if !wmo.is_empty() {
                    *state.messages.by_wmo.entry(wmo.clone()).or_insert(0) += 1;
                }
            }
            Event::StatsMessageFailed { error_kind } => {
                state.messages.total_failed += 1;
                *state.messages.by_error_kind.entry(error_kind.clone()).or_insert(0) += 1;
            }
            Event::StatsMessagePublished => {
                state.messages.total_published += 1;
            }
            Event::StatsHandlerRegistered { name, handler_type } => {
                state
                    .sinks
                    .entry(name.clone())
                    .or_insert_with(|| SinkStats::new(handler_type.clone()));
            }
            Event::StatsHandlerConnected { name } => {
                if let Some(sink) = state.sinks.get_mut(name) {
                    sink.connected_at = Some(Utc::now());
                    sink.disconnected_at = None;
                    sink.is_connected = true;
                }
            }
            Event::StatsHandlerDisconnected { name } => {
                if let Some(sink) = state.sinks.get_mut(name) {
                    sink.disconnected_at = Some(Utc::now());
                    sink.is_connected = false;
                }
            }
            Event::StatsHandlerPublishSuccess { name } => {
                if let Some(sink) = state.sinks.get_mut(name) {
                    sink.total_published += 1;
                    sink.last_publish_time = Some(Utc::now());
                }
            }
            Event::StatsHandlerPublishFailed { name } => {
                if let Some(sink) = state.sinks.get_mut(name) {
                    sink.total_failed += 1;
                }
            }
            Event::StatsHandlerConnectionError { name } => {
                if let Some(sink) = state.sinks.get_mut(name) {
                    sink.connection_errors += 1;
                }
            }
            Event::ProductReceived(_) | Event::XmppError(_) => {}
        }
    }

    /// A deep copy of the current state, safe to read without the lock.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().expect("aggregator lock poisoned");
        Snapshot::from_state(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_messages_and_computes_rates() {
        let bus = EventBus::new();
        let aggregator = Aggregator::new(&bus);

        bus.publish(Event::StatsMessageReceived);
        bus.publish(Event::StatsMessageReceived);
        bus.publish(Event::StatsMessageProcessed {
            source: "KOUN".into(),
            afos: "TORKOUN".into(),
            wmo: "WFUS54".into(),
            product_id: "p".into(),
        });

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.messages.total_received, 2);
        assert_eq!(snapshot.messages.total_processed, 1);
        assert_eq!(snapshot.message_success_rate(), 0.5);
        assert_eq!(*snapshot.messages.by_source.get("KOUN").unwrap(), 1);
    }

    #[test]
    fn pong_never_underflows_outstanding_pings() {
        let bus = EventBus::new();
        let aggregator = Aggregator::new(&bus);

        bus.publish(Event::StatsPongReceived);
        assert_eq!(aggregator.snapshot().connection.outstanding_pings, 0);
    }

    #[test]
    fn tracks_sink_lifecycle() {
        let bus = EventBus::new();
        let aggregator = Aggregator::new(&bus);

        bus.publish(Event::StatsHandlerRegistered {
            name: "console".into(),
            handler_type: "console".into(),
        });
        bus.publish(Event::StatsHandlerConnected { name: "console".into() });
        bus.publish(Event::StatsHandlerPublishSuccess { name: "console".into() });

        let snapshot = aggregator.snapshot();
        let sink = snapshot.sinks.get("console").unwrap();
        assert!(sink.is_connected);
        assert_eq!(sink.total_published, 1);
        assert_eq!(snapshot.sink_success_rate("console"), 1.0);
    }
}
