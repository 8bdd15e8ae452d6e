//! The in-process publish/subscribe event bus (spec.md §4.1).
//!
//! Topics are a closed set (§6.5); each carries exactly one [`Event`] shape.
//! `publish` dispatches synchronously, in subscriber-registration order, on
//! the publisher's thread; a subscriber that panics is caught and logged,
//! and does not prevent later subscribers from running. There is no
//! buffering: a `publish` that races a `subscribe` does not deliver to the
//! new subscriber (see `tests/bus.rs`).
//!
//! Rust closures have no stable notion of "identical handler reference", so
//! `subscribe` returns a [`SubscriptionId`] token instead; `unsubscribe`
//! takes that token back and is a no-op if it's already gone, giving the
//! same idempotence spec.md asks for.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::product::Product;

/// The closed set of bus topics (spec.md §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ProductReceived,
    XmppConnected,
    XmppDisconnected,
    XmppError,
    StatsConnectionAttempt,
    StatsConnectionEstablished,
    StatsConnectionLost,
    StatsConnectionError,
    StatsReconnectAttempt,
    StatsAuthFailure,
    StatsPingSent,
    StatsPongReceived,
    StatsMessageReceived,
    StatsGroupchatMessageReceived,
    StatsMessageProcessed,
    StatsMessageFailed,
    StatsMessagePublished,
    StatsHandlerRegistered,
    StatsHandlerConnected,
    StatsHandlerDisconnected,
    StatsHandlerPublishSuccess,
    StatsHandlerPublishFailed,
    StatsHandlerConnectionError,
}

/// All topics in the closed set, in no particular order. Used by the
/// statistics aggregator to subscribe to everything at startup.
pub const ALL_TOPICS: &[Topic] = &[
    Topic::ProductReceived,
    Topic::XmppConnected,
    Topic::XmppDisconnected,
    Topic::XmppError,
    Topic::StatsConnectionAttempt,
    Topic::StatsConnectionEstablished,
    Topic::StatsConnectionLost,
    Topic::StatsConnectionError,
    Topic::StatsReconnectAttempt,
    Topic::StatsAuthFailure,
    Topic::StatsPingSent,
    Topic::StatsPongReceived,
    Topic::StatsMessageReceived,
    Topic::StatsGroupchatMessageReceived,
    Topic::StatsMessageProcessed,
    Topic::StatsMessageFailed,
    Topic::StatsMessagePublished,
    Topic::StatsHandlerRegistered,
    Topic::StatsHandlerConnected,
    Topic::StatsHandlerDisconnected,
    Topic::StatsHandlerPublishSuccess,
    Topic::StatsHandlerPublishFailed,
    Topic::StatsHandlerConnectionError,
];

/// A single event, tagged with the topic it belongs to via [`Event::topic`].
#[derive(Debug, Clone)]
pub enum Event {
    ProductReceived(Arc<Product>),
    XmppConnected,
    XmppDisconnected,
    XmppError(String),
    StatsConnectionAttempt,
    StatsConnectionEstablished,
    StatsConnectionLost,
    StatsConnectionError,
    StatsReconnectAttempt,
    StatsAuthFailure,
    StatsPingSent,
    StatsPongReceived,
    StatsMessageReceived,
    StatsGroupchatMessageReceived,
    StatsMessageProcessed {
        source: String,
        afos: String,
        wmo: String,
        product_id: String,
    },
    StatsMessageFailed {
        error_kind: String,
    },
    StatsMessagePublished,
    StatsHandlerRegistered {
        name: String,
        handler_type: String,
    },
    StatsHandlerConnected {
        name: String,
    },
    StatsHandlerDisconnected {
        name: String,
    },
    StatsHandlerPublishSuccess {
        name: String,
    },
    StatsHandlerPublishFailed {
        name: String,
    },
    StatsHandlerConnectionError {
        name: String,
    },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::ProductReceived(_) => Topic::ProductReceived,
            Event::XmppConnected => Topic::XmppConnected,
            Event::XmppDisconnected => Topic::XmppDisconnected,
            Event::XmppError(_) => Topic::XmppError,
            Event::StatsConnectionAttempt => Topic::StatsConnectionAttempt,
            Event::StatsConnectionEstablished => Topic::StatsConnectionEstablished,
            Event::StatsConnectionLost => Topic::StatsConnectionLost,
            Event::StatsConnectionError => Topic::StatsConnectionError,
            Event::StatsReconnectAttempt => Topic::StatsReconnectAttempt,
            Event::StatsAuthFailure => Topic::StatsAuthFailure,
            Event::StatsPingSent => Topic::StatsPingSent,
            Event::StatsPongReceived => Topic::StatsPongReceived,
            Event::StatsMessageReceived => Topic::StatsMessageReceived,
            Event::StatsGroupchatMessageReceived => Topic::StatsGroupchatMessageReceived,
            Event::StatsMessageProcessed { .. } => Topic::StatsMessageProcessed,
            Event::StatsMessageFailed { .. } => Topic::StatsMessageFailed,
            Event::StatsMessagePublished => Topic::StatsMessagePublished,
            Event::StatsHandlerRegistered { .. } => Topic::StatsHandlerRegistered,
            Event::StatsHandlerConnected { .. } => Topic::StatsHandlerConnected,
            Event::StatsHandlerDisconnected { .. } => Topic::StatsHandlerDisconnected,
            Event::StatsHandlerPublishSuccess { .. } => Topic::StatsHandlerPublishSuccess,
            Event::StatsHandlerPublishFailed { .. } => Topic::StatsHandlerPublishFailed,
            Event::StatsHandlerConnectionError { .. } => Topic::StatsHandlerConnectionError,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`], required to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Subscribers {
    by_topic: HashMap<Topic, Vec<Subscriber>>,
}

pub struct EventBus {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Subscribers::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes `handler` to `topic`, returning a token to unsubscribe it.
    pub fn subscribe(&self, topic: Topic, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.lock().expect("event bus lock poisoned");
        subs.by_topic
            .entry(topic)
            .or_default()
            .push(Subscriber { id, handler });
        id
    }

    /// Removes a subscription. Idempotent: unsubscribing an id that is
    /// already gone (or never existed) is a no-op.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) {
        let mut subs = self.subscribers.lock().expect("event bus lock poisoned");
        if let Some(list) = subs.by_topic.get_mut(&topic) {
            list.retain(|s| s.id != id);
        }
    }

    /// Diagnostic: the current subscriber list for `topic`, in registration
    /// order.
    pub fn subscribers(&self, topic: Topic) -> Vec<SubscriptionId> {
        let subs = self.subscribers.lock().expect("event bus lock poisoned");
        subs.by_topic
            .get(&topic)
            .map(|list| list.iter().map(|s| s.id).collect())
            .unwrap_or_default()
    }

    /// Diagnostic: the number of subscribers currently registered on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let subs = self.subscribers.lock().expect("event bus lock poisoned");
        subs.by_topic.get(&topic).map_or(0, Vec::len)
    }

    /// Synchronously invokes every current subscriber of `event`'s topic, in
    /// registration order. The subscriber map's lock is not held during
    /// dispatch. A panicking subscriber is caught, logged, and does not
    /// block later subscribers.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();

        let handlers: Vec<Handler> = {
            let subs = self.subscribers.lock().expect("event bus lock poisoned");
            subs.by_topic
                .get(&topic)
                .map(|list| list.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            let event = event.clone();
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                log::error!("subscriber panicked handling {:?}", topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn dispatches_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            bus.subscribe(
                Topic::StatsPingSent,
                Arc::new(move |_| order.lock().unwrap().push(i)),
            );
        }

        bus.publish(Event::StatsPingSent);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn a_panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Topic::StatsPingSent, Arc::new(|_| panic!("boom")));
        let ran2 = ran.clone();
        bus.subscribe(
            Topic::StatsPingSent,
            Arc::new(move |_| {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(Event::StatsPingSent);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let id = bus.subscribe(Topic::StatsPingSent, Arc::new(|_| {}));
        bus.unsubscribe(Topic::StatsPingSent, id);
        bus.unsubscribe(Topic::StatsPingSent, id);
        assert_eq!(bus.subscriber_count(Topic::StatsPingSent), 0);
    }

    #[test]
    fn subscribers_lists_ids_in_registration_order_and_drops_on_unsubscribe() {
        let bus = EventBus::new();
        let first = bus.subscribe(Topic::StatsPingSent, Arc::new(|_| {}));
        let second = bus.subscribe(Topic::StatsPingSent, Arc::new(|_| {}));

        assert_eq!(bus.subscribers(Topic::StatsPingSent), vec![first, second]);

        bus.unsubscribe(Topic::StatsPingSent, first);
        assert_eq!(bus.subscribers(Topic::StatsPingSent), vec![second]);
    }

    #[test]
    fn publish_then_subscribe_does_not_deliver_late() {
        let bus = EventBus::new();
        bus.publish(Event::StatsPingSent);

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        bus.subscribe(
            Topic::StatsPingSent,
            Arc::new(move |_| {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
