//! The supervisor (spec.md §4.9): orchestrates startup/shutdown ordering,
//! OS signal handling, and fatal-error escalation. Nothing below this
//! module ever calls `std::process::exit`; it's the only place exit
//! codes (spec.md §6.6) are decided.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::bus::{Event, EventBus, Topic};
use crate::config::Config;
use crate::handlers::HandlerRegistry;
use crate::metrics;
use crate::product::ProductParser;
use crate::session::Session;
use crate::stats::{self, Aggregator};

const STAGE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Supervisor {
    config: Config,
    parser: Arc<dyn ProductParser>,
}

impl Supervisor {
    pub fn new(config: Config, parser: Arc<dyn ProductParser>) -> Self {
        Self { config, parser }
    }

    /// Runs until shutdown (signal, fatal XMPP condition, or the session
    /// task ending on its own) and returns the process exit code.
    pub async fn run(self) -> i32 {
        let bus = Arc::new(EventBus::new());
        let aggregator = Aggregator::new(&bus);
        let metrics_task = metrics::spawn(aggregator.clone(), &self.config.metrics);
        let stats_task = stats::spawn_periodic_logger(aggregator.clone(), self.config.stats_interval_secs);

        let registry = Arc::new(HandlerRegistry::new(bus.clone()));
        registry.start(&self.config.output).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let exit_code = Arc::new(AtomicI32::new(0));

        let fatal_shutdown_tx = shutdown_tx.clone();
        let fatal_exit_code = exit_code.clone();
        bus.subscribe(
            Topic::XmppError,
            Arc::new(move |event: &Event| {
                let Event::XmppError(message) = event else { return };
                if message.contains("Maximum reconnection attempts reached")
                    || message.contains("authentication failure")
                {
                    fatal_exit_code.store(1, Ordering::SeqCst);
                    let _ = fatal_shutdown_tx.send(true);
                }
            }),
        );

        let session = Session::new(self.config.clone(), bus.clone(), self.parser.clone());
        let mut session_task = tokio::spawn(session.run(shutdown_rx));

        tokio::select! {
            _ = wait_for_signal() => {
                log::info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            result = &mut session_task => {
                if let Err(e) = result {
                    log::error!("session task ended unexpectedly: {}", e);
                }
            }
        }

        if !session_task.is_finished() {
            if tokio::time::timeout(STAGE_TIMEOUT, &mut session_task).await.is_err() {
                log::warn!("xmpp session did not stop within the shutdown budget");
                session_task.abort();
            }
        }

        if tokio::time::timeout(STAGE_TIMEOUT, registry.stop()).await.is_err() {
            log::warn!("handler registry did not stop within the shutdown budget");
        }

        if let Some(task) = metrics_task {
            task.abort();
        }
        stats_task.abort();

        log::info!("shutdown complete");
        exit_code.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
