//! Error types for filtering and retrieval.

use sitegrid_store::design::DesignLookupError;
use sitegrid_store::{StoreError, SubGridKey};

use crate::data_type::GridDataType;

/// Errors decoding a serialized filter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterCodecError {
    /// The leading version byte is not the supported version.
    #[error("filter version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Supported version.
        expected: u8,
        /// Version found in the input.
        found: u8,
    },

    /// The input ended early.
    #[error("filter bytes truncated while reading {field}")]
    Truncated {
        /// Field being read.
        field: &'static str,
    },

    /// An enum code or presence byte is out of range.
    #[error("invalid tag {tag} for {field}")]
    InvalidTag {
        /// Field being read.
        field: &'static str,
        /// Offending value.
        tag: u8,
    },
}

/// Errors failing a single tile retrieval.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The tile's declared type cannot be filled by this retriever.
    #[error("tile type {requested} is not compatible with retriever type {configured}")]
    IncompatibleDataType {
        /// Type declared by the tile.
        requested: GridDataType,
        /// Type the retriever was configured for.
        configured: GridDataType,
    },

    /// The design-elevation lookup failed.
    #[error("design lookup failed for tile ({}, {}): {status}", origin.origin_x, origin.origin_y)]
    DesignLookupFailed {
        /// Tile origin.
        origin: SubGridKey,
        /// Lookup status.
        #[source]
        status: DesignLookupError,
    },

    /// A leaf tile exists but owns no cell storage.
    #[error("leaf tile at ({}, {}) has no allocated cell storage", origin.origin_x, origin.origin_y)]
    MissingCellStorage {
        /// Tile origin.
        origin: SubGridKey,
    },

    /// A store primitive failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The result type for retrieval.
pub type Result<T> = std::result::Result<T, RetrievalError>;
