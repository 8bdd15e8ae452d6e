#![forbid(unsafe_code)]

//! Ingests NWWS-OI XMPP text products and fans them out to output sinks.
//!
//! The library never touches the environment or a logging framework
//! configuration directly — see [`Supervisor`] for the piece that wires
//! everything together, and the `nwws-bridge` binary for environment
//! variable parsing and `env_logger` setup.

pub mod bus;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod product;
pub mod session;
pub mod stats;
pub mod supervisor;

pub use bus::{Event, EventBus, Topic};
pub use config::Config;
pub use error::{Error, ParseError, Result, SinkError};
pub use product::{DefaultProductParser, Product, ProductParser, RawProduct};
pub use session::Session;
pub use supervisor::Supervisor;
