//! Typed storage keys for compile-time path safety.
//!
//! Every key the spatial store persists is built here so that the durable
//! layout lives in one place. Spatial keys (segments, directories) carry the
//! leaf tile origin; non-spatial keys (roster, events, metadata) carry only the
//! site model.
//!
//! # Layout
//!
//! ```text
//! site-model={id}/
//! ├── spatial/{x}-{y}/directory.json
//! ├── spatial/{x}-{y}/segments/{start_us}-{end_us}-{version}.seg
//! ├── events/{machine_uid}.json
//! ├── existence.json
//! ├── machines.json
//! ├── designs.json
//! └── metadata.json
//! retirement/site-model={id}/{entry_id}.json
//! ```
//!
//! # Example
//!
//! ```rust
//! use sitegrid_core::id::{SegmentVersion, SiteModelId};
//! use sitegrid_core::storage_keys::{DirectoryKey, SegmentKey, StorageKey};
//!
//! let site = SiteModelId::generate();
//! let dir = DirectoryKey::new(site, 64, 96);
//! let seg = SegmentKey::new(site, 64, 96, 0, 1_000, SegmentVersion::generate());
//! assert!(seg.path().starts_with(dir.tile_prefix()));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{MachineUid, SegmentVersion, SiteModelId};

/// A typed storage key that encodes path structure.
pub trait StorageKey: AsRef<str> {
    /// Returns the underlying path string.
    fn path(&self) -> &str {
        self.as_ref()
    }
}

/// Prefix shared by every key of one site model.
#[must_use]
pub fn site_model_prefix(site_model: SiteModelId) -> String {
    format!("site-model={site_model}/")
}

fn tile_prefix(site_model: SiteModelId, origin_x: u32, origin_y: u32) -> String {
    format!(
        "{}spatial/{origin_x}-{origin_y}/",
        site_model_prefix(site_model)
    )
}

macro_rules! string_key {
    ($name:ident) => {
        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl StorageKey for $name {}

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

/// Key of one persisted segment's cell-pass bytes.
///
/// Segments are immutable once written; a rewrite allocates a new version and
/// therefore a new key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentKey(String);

impl SegmentKey {
    /// Builds the key for a segment of the leaf tile at `(origin_x, origin_y)`.
    #[must_use]
    pub fn new(
        site_model: SiteModelId,
        origin_x: u32,
        origin_y: u32,
        start_micros: i64,
        end_micros: i64,
        version: SegmentVersion,
    ) -> Self {
        Self(format!(
            "{}segments/{start_micros}-{end_micros}-{version}.seg",
            tile_prefix(site_model, origin_x, origin_y)
        ))
    }

    /// Wraps an already-built key string (for example one read from a
    /// retirement entry).
    #[must_use]
    pub fn from_raw(path: impl Into<String>) -> Self {
        Self(path.into())
    }
}

string_key!(SegmentKey);

/// Key of a leaf tile's segment directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryKey(String, String);

impl DirectoryKey {
    /// Builds the directory key of the leaf tile at `(origin_x, origin_y)`.
    #[must_use]
    pub fn new(site_model: SiteModelId, origin_x: u32, origin_y: u32) -> Self {
        let prefix = tile_prefix(site_model, origin_x, origin_y);
        Self(format!("{prefix}directory.json"), prefix)
    }

    /// Prefix shared by the directory and all segments of the tile.
    #[must_use]
    pub fn tile_prefix(&self) -> &str {
        &self.1
    }

    /// Prefix under which every directory of a site model lives.
    #[must_use]
    pub fn spatial_prefix(site_model: SiteModelId) -> String {
        format!("{}spatial/", site_model_prefix(site_model))
    }
}

impl AsRef<str> for DirectoryKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl StorageKey for DirectoryKey {}

impl fmt::Display for DirectoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-spatial site-model documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteModelDocument {
    /// The existence map of leaf tiles.
    ExistenceMap,
    /// The machine roster.
    Machines,
    /// The design-name table.
    Designs,
    /// Denormalized metadata (extent, machine count, last modified).
    Metadata,
}

impl SiteModelDocument {
    const fn file_name(self) -> &'static str {
        match self {
            Self::ExistenceMap => "existence.json",
            Self::Machines => "machines.json",
            Self::Designs => "designs.json",
            Self::Metadata => "metadata.json",
        }
    }
}

/// Key of a non-spatial site-model document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Builds the key of `document` for `site_model`.
    #[must_use]
    pub fn new(site_model: SiteModelId, document: SiteModelDocument) -> Self {
        Self(format!(
            "{}{}",
            site_model_prefix(site_model),
            document.file_name()
        ))
    }
}

string_key!(DocumentKey);

/// Key of one machine's persisted event lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventListKey(String);

impl EventListKey {
    /// Builds the event-list key of `machine` within `site_model`.
    #[must_use]
    pub fn new(site_model: SiteModelId, machine: MachineUid) -> Self {
        Self(format!("{}events/{machine}.json", site_model_prefix(site_model)))
    }
}

string_key!(EventListKey);

/// Key of one retirement-queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetirementKey(String);

impl RetirementKey {
    /// Builds the key of entry `entry_id` queued for `site_model`.
    #[must_use]
    pub fn new(site_model: SiteModelId, entry_id: &str) -> Self {
        Self(format!("{}{entry_id}.json", Self::prefix(site_model)))
    }

    /// Prefix under which every retirement entry of a site model lives.
    #[must_use]
    pub fn prefix(site_model: SiteModelId) -> String {
        format!("retirement/site-model={site_model}/")
    }

    /// Prefix under which every retirement entry lives.
    #[must_use]
    pub fn root() -> &'static str {
        "retirement/"
    }

    /// Wraps an already-built key string.
    #[must_use]
    pub fn from_raw(path: impl Into<String>) -> Self {
        Self(path.into())
    }
}

string_key!(RetirementKey);
