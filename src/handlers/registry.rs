//! The handler registry (spec.md §4.4). Grounded in
//! `app/handlers/registry.py`'s `HandlerRegistry`: factories keyed by
//! name, concurrent starts/stops, and isolation so one sink's failure
//! doesn't affect another or the ingest path.
//!
//! Unlike the Python original, the `product.received` subscription lives
//! here rather than inside a handler base class — each active handler's
//! subscriber closure hops to its own task before calling `publish`, so a
//! slow sink never blocks the bus's synchronous dispatch (spec.md §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::bus::{Event, EventBus, SubscriptionId, Topic};
use crate::config::OutputConfig;

use super::console::ConsoleHandler;
use super::mqtt::MqttHandler;
use super::OutputHandler;

type Factory = Arc<dyn Fn(&OutputConfig) -> Arc<dyn OutputHandler> + Send + Sync>;

struct ActiveHandler {
    handler: Arc<dyn OutputHandler>,
    subscription: SubscriptionId,
}

pub struct HandlerRegistry {
    bus: Arc<EventBus>,
    factories: Mutex<HashMap<String, Factory>>,
    active: Mutex<HashMap<String, ActiveHandler>>,
    started: AtomicBool,
}

impl HandlerRegistry {
    /// A registry with the built-in `console` and `mqtt` factories already
    /// installed.
    pub fn new(bus: Arc<EventBus>) -> Self {
        let registry = Self {
            bus,
            factories: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        };

        registry.register_factory("console", |_config| {
            Arc::new(ConsoleHandler) as Arc<dyn OutputHandler>
        });
        registry.register_factory("mqtt", |config| {
            Arc::new(MqttHandler::new(config.mqtt.clone().unwrap_or_default())) as Arc<dyn OutputHandler>
        });

        registry
    }

    /// Installs a factory for a sink type. Only types installed here are
    /// creatable by `start`.
    pub fn register_factory(
        &self,
        name: &str,
        factory: impl Fn(&OutputConfig) -> Arc<dyn OutputHandler> + Send + Sync + 'static,
    ) {
        self.factories
            .lock()
            .expect("handler factory lock poisoned")
            .insert(name.to_string(), Arc::new(factory));
    }

    /// Starts every enabled sink concurrently. A second call is a no-op.
    pub async fn start(&self, config: &OutputConfig) {
        if self.started.swap(true, Ordering::SeqCst) {
            log::warn!("handler registry is already running");
            return;
        }

        log::info!("starting handler registry");

        let mut names: Vec<String> = config
            .enabled_handlers
            .iter()
            .map(|name| name.to_lowercase())
            .collect();
        if names.is_empty() {
            names.push("console".to_string());
        }

        let mut to_start = Vec::new();
        {
            let factories = self.factories.lock().expect("handler factory lock poisoned");
            for name in names {
                match factories.get(&name) {
                    Some(factory) => to_start.push((name, factory(config))),
                    None => log::warn!("unknown handler type {}", name),
                }
            }
        }

        if to_start.is_empty() {
            log::warn!("no known handlers enabled, falling back to console");
            let factories = self.factories.lock().expect("handler factory lock poisoned");
            if let Some(factory) = factories.get("console") {
                to_start.push(("console".to_string(), factory(config)));
            }
        }

        let starts = to_start
            .into_iter()
            .map(|(name, handler)| self.start_one(name, handler));
        futures::future::join_all(starts).await;
    }

    async fn start_one(&self, name: String, handler: Arc<dyn OutputHandler>) {
        self.bus.publish(Event::StatsHandlerRegistered {
            name: name.clone(),
            handler_type: handler.handler_type().to_string(),
        });

        match handler.start_handler().await {
            Ok(()) => {
                let subscription = self.subscribe(name.clone(), handler.clone());
                self.active
                    .lock()
                    .expect("active handler lock poisoned")
                    .insert(name.clone(), ActiveHandler { handler, subscription });
                self.bus.publish(Event::StatsHandlerConnected { name });
            }
            Err(e) => {
                log::error!("failed to start handler {}: {}", name, e);
                self.bus.publish(Event::StatsHandlerConnectionError { name });
            }
        }
    }

    fn subscribe(&self, name: String, handler: Arc<dyn OutputHandler>) -> SubscriptionId {
        let bus = self.bus.clone();
        self.bus.subscribe(
            Topic::ProductReceived,
            Arc::new(move |event: &Event| {
                let Event::ProductReceived(product) = event else {
                    return;
                };
                let bus = bus.clone();
                let handler = handler.clone();
                let product = product.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    if !handler.is_connected() {
                        return;
                    }
                    match handler.publish(&product).await {
                        Ok(()) => bus.publish(Event::StatsHandlerPublishSuccess { name }),
                        Err(e) => {
                            log::warn!("sink {} failed to publish: {}", name, e);
                            bus.publish(Event::StatsHandlerPublishFailed { name });
                        }
                    }
                });
            }),
        )
    }

    /// Unsubscribes and stops every active sink concurrently. A call before
    /// any `start` is a no-op.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        log::info!("stopping handler registry");

        let active: Vec<(String, ActiveHandler)> = self
            .active
            .lock()
            .expect("active handler lock poisoned")
            .drain()
            .collect();

        let stops = active.into_iter().map(|(name, entry)| {
            self.bus.unsubscribe(Topic::ProductReceived, entry.subscription);
            let bus = self.bus.clone();
            async move {
                entry.handler.stop_handler().await;
                bus.publish(Event::StatsHandlerDisconnected { name });
            }
        });
        futures::future::join_all(stops).await;
    }
}
