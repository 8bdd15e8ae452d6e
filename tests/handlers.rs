use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use nwws_bridge::config::OutputConfig;
use nwws_bridge::handlers::{HandlerRegistry, OutputHandler};
use nwws_bridge::{Event, EventBus, Product, SinkError, Topic};

fn sample_product(id: &str) -> Product {
    Product {
        product_id: id.to_string(),
        source: "KOUN".to_string(),
        afos: "TORKOUN".to_string(),
        wmo_header: "WFUS54".to_string(),
        issue_time: Utc::now(),
        subject: "test".to_string(),
        body_json: "{}".to_string(),
    }
}

/// A sink that records every product it's handed and can be made to fail.
struct RecordingHandler {
    label: &'static str,
    received: Mutex<Vec<String>>,
    started: AtomicBool,
    fail: AtomicBool,
}

impl RecordingHandler {
    fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            received: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl OutputHandler for RecordingHandler {
    async fn start_handler(&self) -> Result<(), SinkError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_handler(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    async fn publish(&self, product: &Product) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Backend("induced failure".to_string()));
        }
        self.received.lock().unwrap().push(product.product_id.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn handler_type(&self) -> &'static str {
        self.label
    }
}

/// A sink whose `start_handler` always fails, to exercise isolation.
struct RefusingHandler;

#[async_trait]
impl OutputHandler for RefusingHandler {
    async fn start_handler(&self) -> Result<(), SinkError> {
        Err(SinkError::Connection("refusing to connect".to_string()))
    }

    async fn stop_handler(&self) {}

    async fn publish(&self, _product: &Product) -> Result<(), SinkError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn handler_type(&self) -> &'static str {
        "refusing"
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn falls_back_to_console_when_nothing_is_enabled() {
    let bus = Arc::new(EventBus::new());
    let registry = HandlerRegistry::new(bus.clone());

    let config = OutputConfig {
        enabled_handlers: vec![],
        mqtt: None,
    };
    registry.start(&config).await;

    assert_eq!(bus.subscriber_count(Topic::ProductReceived), 1);
    registry.stop().await;
}

#[tokio::test]
async fn unknown_handler_names_fall_back_to_console() {
    let bus = Arc::new(EventBus::new());
    let registry = HandlerRegistry::new(bus.clone());

    let config = OutputConfig {
        enabled_handlers: vec!["not-a-real-sink".to_string()],
        mqtt: None,
    };
    registry.start(&config).await;

    assert_eq!(bus.subscriber_count(Topic::ProductReceived), 1);
    registry.stop().await;
}

#[tokio::test]
async fn start_is_idempotent() {
    let bus = Arc::new(EventBus::new());
    let registry = HandlerRegistry::new(bus.clone());
    let config = OutputConfig::default();

    registry.start(&config).await;
    registry.start(&config).await;

    assert_eq!(bus.subscriber_count(Topic::ProductReceived), 1);
    registry.stop().await;
}

#[tokio::test]
async fn stop_before_start_is_a_no_op() {
    let bus = Arc::new(EventBus::new());
    let registry = HandlerRegistry::new(bus.clone());
    registry.stop().await;
    assert_eq!(bus.subscriber_count(Topic::ProductReceived), 0);
}

#[tokio::test]
async fn stop_unsubscribes_and_is_idempotent() {
    let bus = Arc::new(EventBus::new());
    let registry = HandlerRegistry::new(bus.clone());
    registry.start(&OutputConfig::default()).await;
    registry.stop().await;
    registry.stop().await;
    assert_eq!(bus.subscriber_count(Topic::ProductReceived), 0);
}

#[tokio::test]
async fn a_refused_sink_does_not_stop_others_from_starting() {
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(HandlerRegistry::new(bus.clone()));

    let good = RecordingHandler::new("good");
    {
        let good = good.clone();
        registry.register_factory("good", move |_config| good.clone() as Arc<dyn OutputHandler>);
    }
    registry.register_factory("refusing", |_config| Arc::new(RefusingHandler) as Arc<dyn OutputHandler>);

    let connection_errors = Arc::new(AtomicUsize::new(0));
    {
        let connection_errors = connection_errors.clone();
        bus.subscribe(
            Topic::StatsHandlerConnectionError,
            Arc::new(move |_| {
                connection_errors.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    let config = OutputConfig {
        enabled_handlers: vec!["good".to_string(), "refusing".to_string()],
        mqtt: None,
    };
    registry.start(&config).await;
    settle().await;

    assert_eq!(connection_errors.load(Ordering::SeqCst), 1);
    assert_eq!(bus.subscriber_count(Topic::ProductReceived), 1);

    bus.publish(Event::ProductReceived(Arc::new(sample_product("p1"))));
    settle().await;
    assert_eq!(*good.received.lock().unwrap(), vec!["p1".to_string()]);

    registry.stop().await;
}

#[tokio::test]
async fn a_failing_sink_does_not_block_a_working_sink() {
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(HandlerRegistry::new(bus.clone()));

    let good = RecordingHandler::new("good");
    let bad = RecordingHandler::new("bad");
    bad.fail.store(true, Ordering::SeqCst);

    {
        let good = good.clone();
        registry.register_factory("good", move |_config| good.clone() as Arc<dyn OutputHandler>);
    }
    {
        let bad = bad.clone();
        registry.register_factory("bad", move |_config| bad.clone() as Arc<dyn OutputHandler>);
    }

    let publish_failures = Arc::new(AtomicUsize::new(0));
    {
        let publish_failures = publish_failures.clone();
        bus.subscribe(
            Topic::StatsHandlerPublishFailed,
            Arc::new(move |_| {
                publish_failures.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    let config = OutputConfig {
        enabled_handlers: vec!["good".to_string(), "bad".to_string()],
        mqtt: None,
    };
    registry.start(&config).await;
    settle().await;

    bus.publish(Event::ProductReceived(Arc::new(sample_product("p1"))));
    settle().await;

    assert_eq!(*good.received.lock().unwrap(), vec!["p1".to_string()]);
    assert_eq!(publish_failures.load(Ordering::SeqCst), 1);

    registry.stop().await;
}
