//! Shared identifiers and vocabulary for the procurement lifecycle core.

mod types;

pub use types::{
    ActorId, AggregateId, AggregateType, PartyId, TriggerSource, UnknownAggregateType,
};
