//! MQTT sink (spec.md §4.5.2): publishes products to a broker and runs a
//! retention bookkeeper that expires retained messages.
//!
//! Grounded in `src/handlers/mqtt.py`'s `MQTTOutputHandler`: the
//! `_published_topics` timestamp map and its periodic sweep become
//! `published_topics` and `spawn_sweep_task` here. `rumqttc` folds the
//! connect/reconnect/keepalive bookkeeping the Python client did by hand
//! into its own event loop, so there is no `_on_connect`/`_on_disconnect`
//! callback pair to reimplement — we just watch the event stream for
//! `ConnAck`/`Disconnect`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::error::SinkError;
use crate::product::Product;

use super::OutputHandler;

const CONNACK_TIMEOUT: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct MqttHandler {
    config: MqttConfig,
    connected: Arc<AtomicBool>,
    client: Mutex<Option<AsyncClient>>,
    published_topics: Arc<Mutex<HashMap<String, Instant>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttHandler {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            client: Mutex::new(None),
            published_topics: Arc::new(Mutex::new(HashMap::new())),
            poll_task: Mutex::new(None),
            sweep_task: Mutex::new(None),
        }
    }

    fn qos(&self) -> QoS {
        match self.config.qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }
}

#[async_trait]
impl OutputHandler for MqttHandler {
    async fn start_handler(&self) -> Result<(), SinkError> {
        if self.config.broker.is_empty() {
            return Err(SinkError::Configuration(
                "mqtt sink requires a broker hostname".to_string(),
            ));
        }

        let mut opts = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.broker.clone(),
            self.config.port,
        );
        opts.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            opts.set_credentials(username.clone(), password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(opts, 32);

        let (connack_tx, connack_rx) = oneshot::channel();
        let connected = self.connected.clone();
        let poll_task = tokio::spawn(async move {
            let mut connack_tx = Some(connack_tx);
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected.store(true, Ordering::SeqCst);
                        if let Some(tx) = connack_tx.take() {
                            let _ = tx.send(true);
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        connected.store(false, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("mqtt event loop error: {}", e);
                        connected.store(false, Ordering::SeqCst);
                        if let Some(tx) = connack_tx.take() {
                            let _ = tx.send(false);
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let connack = tokio::time::timeout(CONNACK_TIMEOUT, connack_rx).await;
        match connack {
            Ok(Ok(true)) => {}
            _ => {
                poll_task.abort();
                return Err(SinkError::Connection(
                    "timed out waiting for broker CONNACK".to_string(),
                ));
            }
        }

        *self.client.lock().expect("mqtt client lock poisoned") = Some(client);
        *self.poll_task.lock().expect("mqtt poll task lock poisoned") = Some(poll_task);

        if self.config.retain {
            let client = self
                .client
                .lock()
                .expect("mqtt client lock poisoned")
                .clone()
                .expect("client just set");
            let published_topics = self.published_topics.clone();
            let expiry = Duration::from_secs(self.config.message_expiry_minutes * 60);
            let sweep_task = tokio::spawn(sweep_loop(client, published_topics, expiry));
            *self.sweep_task.lock().expect("mqtt sweep task lock poisoned") = Some(sweep_task);
        }

        Ok(())
    }

    async fn stop_handler(&self) {
        if let Some(task) = self.sweep_task.lock().expect("mqtt sweep task lock poisoned").take() {
            task.abort();
        }

        if self.config.retain {
            let client = self.client.lock().expect("mqtt client lock poisoned").clone();
            if let Some(client) = client {
                let topics: Vec<String> = self
                    .published_topics
                    .lock()
                    .expect("mqtt published topics lock poisoned")
                    .keys()
                    .cloned()
                    .collect();
                for topic in topics {
                    client.publish(&topic, QoS::AtMostOnce, true, Vec::new()).await.ok();
                }
                self.published_topics
                    .lock()
                    .expect("mqtt published topics lock poisoned")
                    .clear();
            }
        }

        if let Some(client) = self.client.lock().expect("mqtt client lock poisoned").take() {
            client.disconnect().await.ok();
        }

        if let Some(task) = self.poll_task.lock().expect("mqtt poll task lock poisoned").take() {
            task.abort();
        }

        self.connected.store(false, Ordering::SeqCst);
    }

    async fn publish(&self, product: &Product) -> Result<(), SinkError> {
        let client = self
            .client
            .lock()
            .expect("mqtt client lock poisoned")
            .clone()
            .ok_or_else(|| SinkError::Connection("mqtt sink not connected".to_string()))?;

        if !self.connected.load(Ordering::SeqCst) {
            return Err(SinkError::Connection("mqtt sink not connected".to_string()));
        }

        let topic = format!(
            "{}/{}/{}/{}",
            self.config.topic_prefix,
            product.source,
            product.channel(),
            product.product_id
        );

        client
            .publish(&topic, self.qos(), self.config.retain, product.body_json.clone().into_bytes())
            .await
            .map_err(|e| SinkError::Backend(e.to_string()))?;

        if self.config.retain {
            self.published_topics
                .lock()
                .expect("mqtt published topics lock poisoned")
                .insert(topic, Instant::now());
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn handler_type(&self) -> &'static str {
        "mqtt"
    }
}

/// Whether a topic published at `since` has outlived `expiry`, as of now.
fn is_expired(since: Instant, expiry: Duration) -> bool {
    since.elapsed() >= expiry
}

async fn sweep_loop(
    client: AsyncClient,
    published_topics: Arc<Mutex<HashMap<String, Instant>>>,
    expiry: Duration,
) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;

        let expired: Vec<String> = {
            let topics = published_topics.lock().expect("mqtt published topics lock poisoned");
            topics
                .iter()
                .filter(|(_, since)| is_expired(**since, expiry))
                .map(|(topic, _)| topic.clone())
                .collect()
        };

        for topic in expired {
            match client.publish(&topic, QoS::AtMostOnce, true, Vec::new()).await {
                Ok(()) => {
                    published_topics
                        .lock()
                        .expect("mqtt published topics lock poisoned")
                        .remove(&topic);
                }
                Err(e) => log::warn!("failed to expire retained topic {}: {}", topic, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_maps_to_the_three_standard_levels() {
        let mut config = MqttConfig::default();
        config.qos = 0;
        assert_eq!(MqttHandler::new(config.clone()).qos(), QoS::AtMostOnce);
        config.qos = 1;
        assert_eq!(MqttHandler::new(config.clone()).qos(), QoS::AtLeastOnce);
        config.qos = 2;
        assert_eq!(MqttHandler::new(config.clone()).qos(), QoS::ExactlyOnce);
        config.qos = 9;
        assert_eq!(MqttHandler::new(config).qos(), QoS::AtLeastOnce);
    }

    #[test]
    fn a_topic_just_under_expiry_is_not_yet_expired() {
        let since = Instant::now() - Duration::from_secs(59);
        assert!(!is_expired(since, Duration::from_secs(60)));
    }

    #[test]
    fn a_topic_past_expiry_is_expired() {
        let since = Instant::now() - Duration::from_secs(61);
        assert!(is_expired(since, Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn starting_without_a_broker_is_a_configuration_error() {
        let config = MqttConfig {
            broker: String::new(),
            ..MqttConfig::default()
        };
        let handler = MqttHandler::new(config);
        let err = handler.start_handler().await.expect_err("empty broker must be rejected");
        assert!(matches!(err, SinkError::Configuration(_)));
        assert!(!handler.is_connected());
        assert_eq!(handler.handler_type(), "mqtt");
    }
}
