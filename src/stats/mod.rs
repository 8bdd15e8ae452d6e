//! Statistics aggregation and periodic reporting (spec.md §4.7, §4.8).

pub mod aggregator;
pub mod snapshot;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

pub use aggregator::Aggregator;
pub use snapshot::{ConnectionStats, MessageStats, SinkStats, Snapshot};

/// Spawns the periodic human-readable stats report (spec.md §4.7/§4.8: "A
/// periodic text logger emits the same snapshot ... every `stats_interval`
/// seconds", with per-minute rates computed from two snapshots roughly 60s
/// apart). Grounded in `app/stats/consumer.py`'s periodic logging task.
pub fn spawn_periodic_logger(aggregator: Arc<Aggregator>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.tick().await; // interval fires immediately; skip it

        let mut previous = aggregator.snapshot();
        let mut previous_at = Instant::now();

        loop {
            interval.tick().await;
            let snapshot = aggregator.snapshot();
            let now = Instant::now();

            let elapsed_minutes = now.duration_since(previous_at).as_secs_f64() / 60.0;
            let processed_per_minute = if elapsed_minutes > 0.0 {
                snapshot
                    .messages
                    .total_processed
                    .saturating_sub(previous.messages.total_processed) as f64
                    / elapsed_minutes
            } else {
                0.0
            };

            log::info!(
                "stats: received={} processed={} failed={} published={} success_rate={:.2} processed_per_minute={:.2} uptime={:?}",
                snapshot.messages.total_received,
                snapshot.messages.total_processed,
                snapshot.messages.total_failed,
                snapshot.messages.total_published,
                snapshot.message_success_rate(),
                processed_per_minute,
                snapshot.uptime(),
            );

            previous = snapshot;
            previous_at = now;
        }
    })
}
