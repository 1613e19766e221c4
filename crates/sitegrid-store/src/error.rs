//! Error types for the spatial store.

use crate::address::SubGridKey;

/// The result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by spatial store primitives.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A durable store or shared primitive failed.
    #[error(transparent)]
    Core(#[from] sitegrid_core::Error),

    /// Persisted bytes could not be decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the decoding failure.
        message: String,
    },

    /// A leaf tile is present but owns no cell storage.
    #[error("leaf tile at ({}, {}) has no allocated cell storage", origin.origin_x, origin.origin_y)]
    MissingCellStorage {
        /// Origin of the offending tile.
        origin: SubGridKey,
    },

    /// A machine index has no roster entry.
    #[error("unknown machine index {index}")]
    UnknownMachine {
        /// The index that was looked up.
        index: u16,
    },

    /// Persisted structures disagree with each other.
    #[error("inconsistent site model: {message}")]
    Inconsistent {
        /// Description of the inconsistency.
        message: String,
    },
}

impl StoreError {
    /// Creates a codec error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an inconsistency error.
    #[must_use]
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }
}
