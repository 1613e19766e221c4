//! Strongly-typed identifiers for sitegrid entities.
//!
//! External identities (site models, machines, designs, surveyed surfaces) are
//! GUIDs assigned upstream, so they wrap a [`Uuid`]. Segment versions are
//! generated locally and wrap a [`Ulid`] so that newer versions sort after
//! older ones.
//!
//! # Example
//!
//! ```rust
//! use sitegrid_core::id::{MachineUid, SiteModelId};
//!
//! let site = SiteModelId::generate();
//! let machine = MachineUid::generate();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: SiteModelId = machine;
//! # let _ = (site, machine);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{Error, Result};

macro_rules! guid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from a raw UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Creates an identifier from its 16 raw bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Returns the 16 raw bytes of the identifier.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// The all-zero identifier.
            #[must_use]
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| Error::InvalidId {
                    message: format!(concat!("invalid ", $label, " '{}': {}"), s, e),
                })
            }
        }
    };
}

guid_id!(
    /// Identifies a site model (one project's spatial store, roster and events).
    SiteModelId,
    "site model ID"
);

guid_id!(
    /// Stable external identity of a machine.
    ///
    /// Unidentified machines are still given a GUID by the decoder, but they
    /// are matched by name rather than by this value.
    MachineUid,
    "machine ID"
);

guid_id!(
    /// Identifies a design surface used for elevation ranges and cut/fill.
    DesignUid,
    "design ID"
);

guid_id!(
    /// Identifies a surveyed surface that a filter may exclude.
    SurveyedSurfaceUid,
    "surveyed surface ID"
);

/// Version of a persisted segment.
///
/// Every rewrite of a segment produces a fresh version and therefore a fresh
/// storage key; the previous key becomes eligible for retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentVersion(Ulid);

impl SegmentVersion {
    /// Generates a new segment version.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a version from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for SegmentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SegmentVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid segment version '{s}': {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_ids_roundtrip_through_strings() {
        let id = MachineUid::generate();
        let parsed: MachineUid = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_guid_ids_roundtrip_through_bytes() {
        let id = SiteModelId::generate();
        assert_eq!(SiteModelId::from_bytes(*id.as_bytes()), id);
    }

    #[test]
    fn test_invalid_guid_is_rejected() {
        let err = "not-a-guid".parse::<DesignUid>().unwrap_err();
        assert!(matches!(err, Error::InvalidId { .. }));
    }

    #[test]
    fn test_segment_versions_sort_by_creation() {
        let first = SegmentVersion::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = SegmentVersion::generate();
        assert!(first < second);
    }
}
