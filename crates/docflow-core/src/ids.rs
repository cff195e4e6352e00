//! Typed identifiers.
//!
//! Every entity is addressed by a numeric id allocated by the store. The
//! newtypes keep a `StepId` from being passed where a `StatusId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Defines a `u64` identifier newtype with the usual conversions.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw id.
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw id.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifier of a [`Circuit`](crate::Circuit).
    CircuitId
);
define_id!(
    /// Identifier of a [`Step`](crate::Step).
    StepId
);
define_id!(
    /// Identifier of a [`Status`](crate::Status).
    StatusId
);
define_id!(
    /// Identifier of a document placed in a circuit.
    DocumentId
);
define_id!(
    /// Identifier of an [`Action`](crate::Action).
    ActionId
);
define_id!(
    /// Identifier of a [`HistoryEntry`](crate::HistoryEntry).
    HistoryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_conversion() {
        let id = StepId::new(7);
        assert_eq!(id.get(), 7);
        assert_eq!(id.to_string(), "7");

        let id: DocumentId = 42.into();
        assert_eq!(id, DocumentId::new(42));
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&CircuitId::new(3)).expect("serialize");
        assert_eq!(json, "3");
        let id: StatusId = serde_json::from_str("11").expect("deserialize");
        assert_eq!(id, StatusId::new(11));
    }
}
