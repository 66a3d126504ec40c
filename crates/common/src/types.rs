use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for an aggregate instance.
    ///
    /// Ids are unique across aggregate types, so a record can be located by
    /// id alone and its type checked afterwards.
    AggregateId
}

uuid_id! {
    /// Identifier of the user (or service account) that requested a transition.
    ActorId
}

uuid_id! {
    /// Identifier of a trading party: a buyer organisation or a supplier.
    PartyId
}

/// The kinds of aggregate governed by a state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Rfq,
    Quote,
    Order,
    VendorOrder,
    Fulfillment,
    Delivery,
    Dispute,
    Invoice,
}

impl AggregateType {
    /// Every aggregate type, in lifecycle order.
    pub const ALL: [AggregateType; 8] = [
        AggregateType::Rfq,
        AggregateType::Quote,
        AggregateType::Order,
        AggregateType::VendorOrder,
        AggregateType::Fulfillment,
        AggregateType::Delivery,
        AggregateType::Dispute,
        AggregateType::Invoice,
    ];

    /// Returns the storage name of the aggregate type.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Rfq => "rfq",
            AggregateType::Quote => "quote",
            AggregateType::Order => "order",
            AggregateType::VendorOrder => "vendor_order",
            AggregateType::Fulfillment => "fulfillment",
            AggregateType::Delivery => "delivery",
            AggregateType::Dispute => "dispute",
            AggregateType::Invoice => "invoice",
        }
    }
}

impl std::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown aggregate type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAggregateType(pub String);

impl std::fmt::Display for UnknownAggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown aggregate type: {}", self.0)
    }
}

impl std::error::Error for UnknownAggregateType {}

impl std::str::FromStr for AggregateType {
    type Err = UnknownAggregateType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregateType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownAggregateType(s.to_string()))
    }
}

/// Who initiated a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// A person acting through the platform.
    #[default]
    User,

    /// The platform itself (rollups, event consumers, schedulers).
    System,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::User => "user",
            TriggerSource::System => "system",
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TriggerSource::User),
            "system" => Ok(TriggerSource::System),
            other => Err(format!("unknown trigger source: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_id_new_creates_unique_ids() {
        let id1 = AggregateId::new();
        let id2 = AggregateId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn aggregate_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = AggregateId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn party_id_parses_from_string() {
        let id = PartyId::new();
        let parsed: PartyId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<PartyId>().is_err());
    }

    #[test]
    fn aggregate_type_names_round_trip() {
        for t in AggregateType::ALL {
            assert_eq!(t.as_str().parse::<AggregateType>().unwrap(), t);
        }
        assert!("saga".parse::<AggregateType>().is_err());
    }

    #[test]
    fn aggregate_type_serializes_as_snake_case() {
        let json = serde_json::to_string(&AggregateType::VendorOrder).unwrap();
        assert_eq!(json, "\"vendor_order\"");
    }

    #[test]
    fn trigger_source_defaults_to_user() {
        assert_eq!(TriggerSource::default(), TriggerSource::User);
        assert_eq!(TriggerSource::System.to_string(), "system");
        assert_eq!("system".parse::<TriggerSource>(), Ok(TriggerSource::System));
    }
}
