//! Core aggregate trait.

use common::{AggregateId, AggregateType, PartyId};
use serde::{Serialize, de::DeserializeOwned};
use store::AggregateRecord;

use crate::error::DomainError;
use crate::guard::{CreationGuard, Guard};
use crate::lifecycle::Lifecycle;
use crate::table::TransitionTable;

/// An entity whose status is governed by a fixed transition table.
///
/// Implementors describe their table, the event type each kind emits, and
/// the guards each kind runs. The engine owns every status change; nothing
/// else calls [`Aggregate::set_status`].
pub trait Aggregate: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Status: Lifecycle;
    type Kind: Lifecycle;

    const AGGREGATE_TYPE: AggregateType;

    fn id(&self) -> AggregateId;

    fn status(&self) -> Self::Status;

    fn set_status(&mut self, status: Self::Status);

    fn table() -> &'static TransitionTable<Self::Status, Self::Kind>;

    /// The outbox event type emitted by `kind`, if it emits one.
    fn event_type(kind: Self::Kind) -> Option<&'static str>;

    /// Guards run, in order, before `kind` is applied.
    fn guards(_kind: Self::Kind) -> &'static [&'static dyn Guard<Self>] {
        &[]
    }

    /// Guards run before the aggregate is first inserted.
    fn creation_guards() -> &'static [&'static dyn CreationGuard<Self>] {
        &[]
    }

    /// The aggregate this one belongs to.
    fn parent_id(&self) -> Option<AggregateId> {
        None
    }

    /// The trading party that owns this aggregate.
    fn owner_id(&self) -> Option<PartyId> {
        None
    }

    /// The parent whose derived status depends on this aggregate's status.
    fn rollup_parent(&self) -> Option<AggregateId> {
        None
    }

    /// Prefix of the reference number assigned on creation, e.g. `ORD`.
    fn reference_prefix() -> Option<&'static str> {
        None
    }

    fn reference_number(&self) -> Option<&str> {
        None
    }

    fn set_reference_number(&mut self, _reference: String) {}

    /// Whether non-status fields may be edited in the current status.
    fn is_editable(&self) -> bool {
        !Self::table().is_terminal(self.status())
    }

    /// Denormalized fields copied into every outbox payload.
    fn event_data(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }

    /// Decodes a stored record, checking that it holds this aggregate type.
    fn from_record(record: AggregateRecord) -> Result<Self, DomainError> {
        if record.aggregate_type != Self::AGGREGATE_TYPE {
            return Err(DomainError::not_found(Self::AGGREGATE_TYPE, record.id));
        }
        Ok(serde_json::from_value(record.state)?)
    }

    /// Builds the first-version record for a new aggregate.
    fn to_record(&self) -> Result<AggregateRecord, DomainError> {
        Ok(AggregateRecord::from_state(
            self.id(),
            Self::AGGREGATE_TYPE,
            self.status().as_str(),
            self,
        )?
        .with_parent(self.parent_id())
        .with_owner(self.owner_id())
        .with_reference_number(self.reference_number().map(str::to_string)))
    }

    /// Copies the aggregate's current state over an existing record.
    fn write_into(&self, record: &mut AggregateRecord) -> Result<(), DomainError> {
        record.status = self.status().as_str().to_string();
        record.parent_id = self.parent_id();
        record.owner_id = self.owner_id();
        record.reference_number = self.reference_number().map(str::to_string);
        record.state = serde_json::to_value(self)?;
        Ok(())
    }
}
