//! Error types and result aliases shared by every sitegrid crate.
//!
//! Errors here describe failures of the durable store boundary and of shared
//! primitives. Domain crates wrap them in their own error enums.

/// The result type used throughout `sitegrid-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier did not parse.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A key was not present in the durable store.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend failed to read, write or delete a key.
    #[error("storage error at {key}: {message}")]
    Storage {
        /// Key the operation targeted.
        key: String,
        /// Description of the backend failure.
        message: String,
    },

    /// A stored document could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A configuration value did not parse.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A backend lock was poisoned or an injected fault fired.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a backend failure for `key`.
    #[must_use]
    pub fn storage(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true when the error reports an absent key.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_absent_keys_are_not_found() {
        assert!(Error::NotFound("a/b".into()).is_not_found());
        assert!(!Error::storage("a/b", "timeout").is_not_found());
    }

    #[test]
    fn test_storage_error_names_the_key() {
        let err = Error::storage("spatial/0-0/directory.json", "connection reset");
        assert_eq!(
            err.to_string(),
            "storage error at spatial/0-0/directory.json: connection reset"
        );
    }

    #[test]
    fn test_json_errors_become_serialization() {
        let err: Error = serde_json::from_slice::<serde_json::Value>(b"{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
