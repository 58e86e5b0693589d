//! Record identifiers and modification timestamps.
//!
//! Identifiers are opaque strings on the wire. Locally created records get a
//! UUID v4, but anything a peer sends is accepted verbatim.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use web_time::{SystemTime, UNIX_EPOCH};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_id!(
    /// Identifier of an [`Item`](crate::Item). Immutable after creation.
    ItemId
);

opaque_id!(
    /// Identifier of a [`Collection`](crate::Collection).
    CollectionId
);

/// Modification time in milliseconds since the Unix epoch.
///
/// This is the only input to last-write-wins resolution. Participants'
/// clocks are assumed to be loosely comparable; there is no skew correction.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Wall-clock time now.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    /// The timestamp for a mutation of a record last modified at `prev`.
    ///
    /// Never returns a value `<= prev`, so two mutations inside the same
    /// millisecond still produce strictly increasing timestamps.
    pub fn advance(prev: Timestamp) -> Self {
        Self::now().max(Timestamp(prev.0.saturating_add(1)))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
