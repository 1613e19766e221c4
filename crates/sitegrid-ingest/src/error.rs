//! Error types for the ingestion pipeline.

use sitegrid_core::SiteModelId;
use sitegrid_store::design::DesignNameId;
use sitegrid_store::{MachineIndex, StoreError};
use thiserror::Error;

/// Result type alias for ingest operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that abort an ingest batch.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A transient machine index has no counterpart in the target numbering.
    #[error("inconsistent machine index mapping: {message}")]
    InconsistentIndexMapping {
        /// Description of the gap.
        message: String,
        /// The index that could not be mapped, if known.
        index: Option<MachineIndex>,
    },

    /// An event refers to a design name its task does not list.
    #[error("event refers to unknown task design name {id}")]
    UnknownDesignName {
        /// The task-local design-name id.
        id: DesignNameId,
    },

    /// A batch with no tasks was submitted.
    #[error("ingest batch is empty")]
    EmptyBatch,

    /// Tasks of one batch target different site models.
    #[error("batch mixes site models {expected} and {found}")]
    MixedSiteModels {
        /// Site model of the integrator or first task.
        expected: SiteModelId,
        /// Site model of the offending task.
        found: SiteModelId,
    },

    /// No integrator is registered for the site model.
    #[error("no integrator registered for site model {0}")]
    UnknownSiteModel(SiteModelId),

    /// The worker pool has shut down.
    #[error("ingest worker pool is closed")]
    WorkerPoolClosed,

    /// Configuration is invalid.
    #[error("invalid ingest configuration: {0}")]
    InvalidConfig(String),

    /// A spatial store primitive failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A durable store operation failed.
    #[error(transparent)]
    Core(#[from] sitegrid_core::Error),
}

impl IngestError {
    /// Creates an index mapping error.
    #[must_use]
    pub fn index_mapping(message: impl Into<String>, index: Option<MachineIndex>) -> Self {
        Self::InconsistentIndexMapping {
            message: message.into(),
            index,
        }
    }

    /// Short label used as a metrics and log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InconsistentIndexMapping { .. } => "index_mapping",
            Self::UnknownDesignName { .. } => "design_name",
            Self::EmptyBatch => "empty_batch",
            Self::MixedSiteModels { .. } => "mixed_site_models",
            Self::UnknownSiteModel(_) => "unknown_site_model",
            Self::WorkerPoolClosed => "pool_closed",
            Self::InvalidConfig(_) => "config",
            Self::Store(_) => "store",
            Self::Core(_) => "storage",
        }
    }
}
