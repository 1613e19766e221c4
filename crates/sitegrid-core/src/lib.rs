//! # sitegrid-core
//!
//! Shared primitives for the sitegrid spatial store.
//!
//! - **Identifiers**: strongly-typed GUIDs for site models, machines, designs
//!   and surveyed surfaces, plus locally generated segment versions
//! - **Durable store boundary**: the opaque key-value contract
//!   ([`StorageBackend`]) with ordered write batches and an in-memory backend
//! - **Storage keys**: the one place the durable layout is defined
//! - **Error types**: the shared error enum and result alias
//! - **Observability**: logging initialisation and span constructors
//!
//! ## Crate Boundary
//!
//! Domain crates (`sitegrid-store`, `sitegrid-query`, `sitegrid-ingest`)
//! depend on this crate and never on each other's persistence details.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sitegrid_core::prelude::*;
//!
//! let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
//! let storage = SiteModelStorage::new(backend, SiteModelId::generate());
//! # let _ = storage;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod id;
pub mod observability;
pub mod site_storage;
pub mod storage;
pub mod storage_keys;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{DesignUid, MachineUid, SegmentVersion, SiteModelId, SurveyedSurfaceUid};
    pub use crate::site_storage::SiteModelStorage;
    pub use crate::storage::{CommitStats, MemoryBackend, StorageBackend, WriteBatch};
    pub use crate::storage_keys::{
        DirectoryKey, DocumentKey, EventListKey, RetirementKey, SegmentKey, SiteModelDocument,
        StorageKey,
    };
}

pub use error::{Error, Result};
pub use id::{DesignUid, MachineUid, SegmentVersion, SiteModelId, SurveyedSurfaceUid};
pub use observability::{LogFormat, init_logging};
pub use site_storage::{SiteModelStorage, json_bytes};
pub use storage::{CommitStats, MemoryBackend, ObjectMeta, StorageBackend, WriteBatch};
