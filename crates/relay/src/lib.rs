//! Outbox delivery for the procurement lifecycle.
//!
//! This crate provides:
//! - Relay workers that claim pending outbox events, deliver them to a sink
//!   and apply the retry and dead-letter policy
//! - Idempotent consumers keyed by `(event_id, handler_name)`, and a sink
//!   that dispatches events to registered handlers through them
//! - A periodic purge of expired processed-event markers
//! - Downstream handlers, and the configuration for the `outbox-relay` binary

pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod purge;
pub mod relay;
pub mod sink;

pub use config::{LogFormat, RelayConfig};
pub use consumer::{EventHandler, HandlerDispatcher, IdempotentConsumer};
pub use error::{RelayError, Result};
pub use handlers::RejectLosingQuotes;
pub use purge::ProcessedEventPurger;
pub use relay::{OutboxRelay, RelayReport};
pub use sink::{DeliveryError, EventSink, InMemorySink, TracingSink};
