pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod processed;
pub mod query;
pub mod record;
pub mod store;

pub use common::{ActorId, AggregateId, AggregateType, PartyId, TriggerSource};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use outbox::{DEFAULT_MAX_RETRIES, EventId, OutboxEvent, OutboxStatus};
pub use postgres::PostgresStore;
pub use processed::ProcessedEvent;
pub use query::OutboxQuery;
pub use record::{AggregateRecord, TransitionRecord, TransitionRecordBuilder};
pub use store::{OutboxStore, ProcessedEventStore, Store, StoreTransaction};
