//! Status and transition-kind enumerations.

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

use serde::{Serialize, de::DeserializeOwned};

/// A closed set of wire-named values: an aggregate's statuses or its
/// transition kinds.
pub trait Lifecycle:
    Copy
    + Eq
    + Hash
    + Ord
    + Debug
    + Display
    + FromStr<Err = ParseLifecycleError>
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Every value, in declaration order.
    const ALL: &'static [Self];

    /// Returns the wire name.
    fn as_str(&self) -> &'static str;
}

/// Error returned when a string names no value of a lifecycle enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {type_name} value: {value}")]
pub struct ParseLifecycleError {
    pub type_name: &'static str,
    pub value: String,
}

/// Declares a lifecycle enum whose variants carry explicit wire names.
macro_rules! lifecycle_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        $vis enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $crate::lifecycle::Lifecycle for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::lifecycle::Lifecycle::as_str(self))
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::lifecycle::ParseLifecycleError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::lifecycle::ParseLifecycleError {
                        type_name: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use lifecycle_enum;
