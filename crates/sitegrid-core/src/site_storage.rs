//! Site-model scoped storage.
//!
//! Wraps a [`StorageBackend`] together with the [`SiteModelId`] whose keys it
//! serves. All reads and writes of one site model go through this type so
//! that typed keys, JSON helpers and commit logging live in one place.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::id::SiteModelId;
use crate::storage::{CommitStats, StorageBackend, WriteBatch};
use crate::storage_keys::{DirectoryKey, StorageKey};

const DIRECTORY_FILE: &str = "directory.json";

/// Storage handle scoped to one site model.
#[derive(Clone)]
pub struct SiteModelStorage {
    backend: Arc<dyn StorageBackend>,
    site_model: SiteModelId,
}

impl std::fmt::Debug for SiteModelStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteModelStorage")
            .field("site_model", &self.site_model)
            .finish_non_exhaustive()
    }
}

impl SiteModelStorage {
    /// Creates a storage handle for `site_model`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, site_model: SiteModelId) -> Self {
        Self {
            backend,
            site_model,
        }
    }

    /// Returns the site model this handle serves.
    #[must_use]
    pub fn site_model_id(&self) -> SiteModelId {
        self.site_model
    }

    /// Returns the backend for operations outside the site-model scope.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the key is absent, or a storage error.
    pub async fn get(&self, key: &impl StorageKey) -> Result<Bytes> {
        self.backend.get(key.path()).await
    }

    /// Reads the value stored under `key`, mapping absence to `None`.
    ///
    /// # Errors
    ///
    /// Returns a storage error for failures other than absence.
    pub async fn get_optional(&self, key: &impl StorageKey) -> Result<Option<Bytes>> {
        match self.backend.get(key.path()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reads and parses a JSON document, mapping absence to `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the document cannot be parsed.
    pub async fn read_json<T: DeserializeOwned>(&self, key: &impl StorageKey) -> Result<Option<T>> {
        let Some(bytes) = self.get_optional(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Serialization {
                message: format!("parse JSON at {}: {e}", key.path()),
            })
    }

    /// Returns true if a value is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub async fn exists(&self, key: &impl StorageKey) -> Result<bool> {
        Ok(self.backend.head(key.path()).await?.is_some())
    }

    /// Commits a batch of writes.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered; earlier operations of the
    /// batch remain applied.
    pub async fn commit(&self, batch: WriteBatch, stage: &'static str) -> Result<CommitStats> {
        if batch.is_empty() {
            return Ok(CommitStats::default());
        }
        let ops = batch.len();
        let stats = self.backend.commit(batch).await?;
        tracing::debug!(
            site_model = %self.site_model,
            stage,
            ops,
            updated = stats.updated_count,
            deleted = stats.deleted_count,
            bytes = stats.bytes_written,
            "committed write batch"
        );
        Ok(stats)
    }

    /// Lists the keys of every persisted segment directory.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing fails.
    pub async fn list_directory_paths(&self) -> Result<Vec<String>> {
        let prefix = DirectoryKey::spatial_prefix(self.site_model);
        let mut paths: Vec<String> = self
            .backend
            .list(&prefix)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .filter(|path| path.ends_with(DIRECTORY_FILE))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Lists every key under `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing fails.
    pub async fn list_paths(&self, prefix: &str) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self
            .backend
            .list(prefix)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Serializes a value as JSON bytes.
///
/// # Errors
///
/// Returns `Error::Serialization` if the value cannot be encoded.
pub fn json_bytes<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Error::Serialization {
            message: format!("failed to serialize JSON: {e}"),
        })
}
