//! Procurement lifecycle domain.
//!
//! This crate provides:
//! - Transition tables and typed status/kind enums for the eight procurement
//!   aggregates (RFQ, Quote, Order, VendorOrder, Fulfillment, Delivery,
//!   Dispute, Invoice)
//! - Guards evaluated before each transition
//! - The state machine engine, which applies a transition, its audit record
//!   and its outbox event as one atomic unit
//! - Status rollups from fulfillments to vendor orders to orders

pub mod aggregate;
pub mod aggregates;
pub mod command;
pub mod engine;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod outbox;
pub mod reference;
pub mod rollup;
pub mod suppliers;
pub mod table;
pub mod value_objects;

pub use aggregate::Aggregate;
pub use aggregates::*;
pub use command::{TransitionOutcome, TransitionRequest};
pub use engine::StateMachineEngine;
pub use error::DomainError;
pub use guard::{COUPLED_FROM, CoupledTransition, CreationGuard, Guard, GuardContext, RequiresReason};
pub use lifecycle::{Lifecycle, ParseLifecycleError};
pub use outbox::{SCHEMA_VERSION, TransitionEventPayload};
pub use reference::format_reference;
pub use rollup::{ROLLUP_FROM, order_status, vendor_order_status};
pub use suppliers::{InMemorySupplierDirectory, SupplierDirectory, SupplierTier};
pub use table::{TableDescription, TransitionTable};
pub use value_objects::{FulfillmentLine, LineItem, Money, OrderLine, PricedLine};
