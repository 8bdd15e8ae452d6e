//! The XMPP session manager (spec.md §4.3): owns the reconnect loop, the
//! housekeeping timer, and the translation of wire events into bus events.
//!
//! The state machine of §4.3.1 collapses naturally onto an async loop:
//! DISCONNECTED/CONNECTING/STREAM_OPEN/AUTHENTICATED are all inside
//! [`Connection::new`]; JOINED is the body of [`run_joined`]; RECONNECT_WAIT
//! is the `sleep` between attempts in [`Session::run`]; CLOSING is whatever
//! branch observes the shutdown signal.

mod connection;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::bus::{Event, EventBus};
use crate::config::Config;
use crate::error::Error;
use crate::ingest;
use crate::product::ProductParser;
use connection::{ConnEvent, Connection};

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);
const GROUPCHAT_SILENCE_LIMIT: Duration = Duration::from_secs(300);
const OUTSTANDING_PING_LIMIT: usize = 5;
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Owns one logical NWWS-OI session. `run` drives it until told to shut
/// down or until a fatal error (bad credentials, reconnect budget
/// exhausted) occurs; both are reported on the bus rather than returned,
/// since the supervisor learns about them the same way every other
/// subscriber does.
pub struct Session {
    config: Config,
    bus: Arc<EventBus>,
    parser: Arc<dyn ProductParser>,
}

enum JoinedExit {
    Shutdown,
    Reconnect,
}

impl Session {
    pub fn new(config: Config, bus: Arc<EventBus>, parser: Arc<dyn ProductParser>) -> Self {
        Self { config, bus, parser }
    }

    /// Runs the reconnect loop until `shutdown` is set to `true`, or until a
    /// fatal condition (auth failure, reconnect budget exhausted) ends the
    /// session permanently.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return;
            }

            self.bus.publish(Event::StatsConnectionAttempt);

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
                result = Connection::new(&self.config) => {
                    match result {
                        Ok(conn) => {
                            attempt = 0;
                            self.bus.publish(Event::XmppConnected);
                            self.bus.publish(Event::StatsConnectionEstablished);
                            match self.run_joined(conn, &mut shutdown).await {
                                JoinedExit::Shutdown => return,
                                JoinedExit::Reconnect => {}
                            }
                        }
                        Err(Error::Credentials(e)) => {
                            log::error!("authentication failure: {}", e);
                            self.bus.publish(Event::StatsAuthFailure);
                            self.bus.publish(Event::XmppError(
                                "authentication failure".to_string(),
                            ));
                            return;
                        }
                        Err(e) => {
                            log::warn!("connection attempt failed: {}", e);
                            self.bus.publish(Event::StatsConnectionError);
                        }
                    }
                }
            }

            if *shutdown.borrow() {
                return;
            }

            attempt += 1;
            if attempt > MAX_RECONNECT_ATTEMPTS {
                self.bus.publish(Event::XmppError(
                    "Maximum reconnection attempts reached".to_string(),
                ));
                return;
            }

            self.bus.publish(Event::StatsReconnectAttempt);
            let delay = reconnect_delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// The JOINED steady state: housekeeping ticks race incoming stanzas
    /// and the shutdown signal.
    async fn run_joined(
        &self,
        mut conn: Connection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> JoinedExit {
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.tick().await; // interval fires immediately; skip it

        loop {
            if *shutdown.borrow() {
                conn.end().await;
                self.bus.publish(Event::XmppDisconnected);
                return JoinedExit::Shutdown;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        conn.end().await;
                        self.bus.publish(Event::XmppDisconnected);
                        return JoinedExit::Shutdown;
                    }
                }
                _ = housekeeping.tick() => {
                    if silence_exceeded(conn.last_groupchat_message_age(), conn.outstanding_ping_count()) {
                        log::warn!("groupchat silence or ping-loss threshold exceeded");
                        self.bus.publish(Event::XmppError(
                            "groupchat silence or ping-loss threshold exceeded".to_string(),
                        ));
                        self.bus.publish(Event::StatsConnectionLost);
                        conn.end().await;
                        self.bus.publish(Event::XmppDisconnected);
                        return JoinedExit::Reconnect;
                    }

                    match conn.send_ping().await {
                        Ok(()) => self.bus.publish(Event::StatsPingSent),
                        Err(e) => {
                            log::warn!("failed to send ping: {}", e);
                            self.bus.publish(Event::StatsConnectionError);
                            conn.end().await;
                            self.bus.publish(Event::XmppDisconnected);
                            return JoinedExit::Reconnect;
                        }
                    }
                }
                event = conn.next_event() => {
                    match event {
                        Ok(ConnEvent::Pong) => self.bus.publish(Event::StatsPongReceived),
                        Ok(ConnEvent::Message { groupchat }) => {
                            self.bus.publish(Event::StatsMessageReceived);
                            if let Some(payload) = groupchat {
                                self.bus.publish(Event::StatsGroupchatMessageReceived);
                                self.ingest_one(payload.x_text, payload.subject);
                            }
                        }
                        Err(e) => {
                            log::warn!("connection lost: {}", e);
                            self.bus.publish(Event::StatsConnectionError);
                            conn.end().await;
                            self.bus.publish(Event::XmppDisconnected);
                            return JoinedExit::Reconnect;
                        }
                    }
                }
            }
        }
    }

    fn ingest_one(&self, x_text: String, subject: String) {
        match ingest::normalize(self.parser.as_ref(), &x_text, subject) {
            Ok(product) => {
                self.bus.publish(Event::StatsMessageProcessed {
                    source: product.source.clone(),
                    afos: product.afos.clone(),
                    wmo: product.wmo_header.clone(),
                    product_id: product.product_id.clone(),
                });
                self.bus.publish(Event::ProductReceived(Arc::new(product)));
                self.bus.publish(Event::StatsMessagePublished);
            }
            Err(e) => {
                self.bus.publish(Event::StatsMessageFailed {
                    error_kind: e.kind().to_string(),
                });
            }
        }
    }
}

/// `min(30 * 2^(n-1), 300)` seconds, n = attempt index starting at 1.
fn reconnect_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let secs = 30u64.saturating_mul(1u64 << shift);
    Duration::from_secs(secs.min(300))
}

/// Whether housekeeping should force a reconnect: groupchat silence past
/// [`GROUPCHAT_SILENCE_LIMIT`], or more than [`OUTSTANDING_PING_LIMIT`]
/// unanswered pings. Both bounds are exclusive: exactly the limit does not
/// force a reconnect.
fn silence_exceeded(groupchat_age: Duration, outstanding_pings: usize) -> bool {
    groupchat_age > GROUPCHAT_SILENCE_LIMIT || outstanding_pings > OUTSTANDING_PING_LIMIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_sequence() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(30));
        assert_eq!(reconnect_delay(2), Duration::from_secs(60));
        assert_eq!(reconnect_delay(3), Duration::from_secs(120));
        assert_eq!(reconnect_delay(4), Duration::from_secs(240));
        assert_eq!(reconnect_delay(5), Duration::from_secs(300));
        assert_eq!(reconnect_delay(10), Duration::from_secs(300));
    }

    #[test]
    fn exactly_the_silence_limit_does_not_force_a_reconnect() {
        assert!(!silence_exceeded(GROUPCHAT_SILENCE_LIMIT, 0));
    }

    #[test]
    fn one_second_past_the_silence_limit_forces_a_reconnect() {
        assert!(silence_exceeded(GROUPCHAT_SILENCE_LIMIT + Duration::from_secs(1), 0));
    }

    #[test]
    fn exactly_the_outstanding_ping_limit_does_not_force_a_reconnect() {
        assert!(!silence_exceeded(Duration::from_secs(0), OUTSTANDING_PING_LIMIT));
    }

    #[test]
    fn one_more_than_the_outstanding_ping_limit_forces_a_reconnect() {
        assert!(silence_exceeded(Duration::from_secs(0), OUTSTANDING_PING_LIMIT + 1));
    }
}
