//! Output sinks (spec.md §4.4/§4.5): autonomous handlers that each own an
//! upstream connection and apply their own retention policy. Grounded in
//! `app/handlers/base.py`'s `OutputHandler` contract, translated from a
//! bus-subscribing base class into a plain async trait — the registry
//! (not the trait) owns the `product.received` subscription here, since
//! Rust has no convenient equivalent of subclassing a pubsub mixin.

pub mod console;
pub mod mqtt;
pub mod registry;

pub use registry::HandlerRegistry;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::product::Product;

/// The contract every sink implements (spec.md §4.5).
#[async_trait]
pub trait OutputHandler: Send + Sync {
    /// Acquire resources; the handler should be ready to accept `publish`
    /// calls once this returns `Ok`.
    async fn start_handler(&self) -> Result<(), SinkError>;

    /// Release resources. Called at most once per `start_handler`.
    async fn stop_handler(&self);

    /// Deliver one product. Errors are counted by the registry, not
    /// retried.
    async fn publish(&self, product: &Product) -> Result<(), SinkError>;

    /// Whether the handler currently believes it can publish.
    fn is_connected(&self) -> bool;

    /// The type tag used for `stats.handler.*` events (`"console"`,
    /// `"mqtt"`, …).
    fn handler_type(&self) -> &'static str;
}
