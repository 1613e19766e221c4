//! Durable store boundary.
//!
//! The spatial store treats its persistence layer as an opaque transactional
//! key-value substrate: `get`, `put`, `delete`, `list`, and `commit` of a
//! [`WriteBatch`]. Backends for real object stores or distributed caches
//! implement [`StorageBackend`]; [`MemoryBackend`] is the in-process
//! implementation used by tests and single-node deployments.
//!
//! ## Commit ordering
//!
//! A batch is applied in insertion order and stops at the first failure. The
//! ingest pipeline relies on this: it commits segment bytes, then segment
//! directories, then site-model metadata as three separate batches, so a
//! crash between batches never leaves a directory pointing at absent bytes.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Metadata about a stored value.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Key of the value.
    pub path: String,
    /// Value size in bytes.
    pub size: u64,
    /// Opaque version token.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Store bytes under a key, replacing any previous value.
    Put {
        /// Target key.
        path: String,
        /// Value bytes.
        data: Bytes,
    },
    /// Remove a key; absent keys are ignored.
    Delete {
        /// Target key.
        path: String,
    },
}

/// An ordered set of mutations committed as one unit.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a put.
    pub fn put(&mut self, path: impl Into<String>, data: Bytes) {
        self.ops.push(BatchOp::Put {
            path: path.into(),
            data,
        });
    }

    /// Appends a delete.
    pub fn delete(&mut self, path: impl Into<String>) {
        self.ops.push(BatchOp::Delete { path: path.into() });
    }

    /// Returns the number of operations in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the batch holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the operations in insertion order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consumes the batch, returning its operations.
    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Outcome of committing a [`WriteBatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Number of keys deleted.
    pub deleted_count: u64,
    /// Number of keys written.
    pub updated_count: u64,
    /// Total bytes written.
    pub bytes_written: u64,
}

impl CommitStats {
    /// Adds another commit's counts to this one.
    pub fn merge(&mut self, other: Self) {
        self.deleted_count += other.deleted_count;
        self.updated_count += other.updated_count;
        self.bytes_written += other.bytes_written;
    }
}

/// Durable key-value backend.
///
/// All backends (object stores, distributed caches, memory) implement this
/// trait.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an entire value.
    ///
    /// Returns `Error::NotFound` if the key doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes a value, replacing any previous one.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Deletes a key. Succeeds even if the key doesn't exist.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists values whose keys start with `prefix`, in arbitrary order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets metadata without reading the value. Returns `None` if absent.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;

    /// Applies a batch in order, stopping at the first failure.
    ///
    /// Operations applied before a failure stay applied; callers that need
    /// all-or-nothing visibility order their batches so that an interrupted
    /// commit leaves only unreferenced data behind.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitStats> {
        let mut stats = CommitStats::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { path, data } => {
                    let size = data.len() as u64;
                    self.put(&path, data).await?;
                    stats.updated_count += 1;
                    stats.bytes_written += size;
                }
                BatchOp::Delete { path } => {
                    self.delete(&path).await?;
                    stats.deleted_count += 1;
                }
            }
        }
        Ok(stats)
    }
}

/// In-memory storage backend.
///
/// Thread-safe via `RwLock`. Uses numeric versions internally (exposed as
/// strings).
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or_default()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        let version = objects.get(path).map_or(1, |o| o.version + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                version,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().map_err(|_| poisoned())?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| ObjectMeta {
                path: path.clone(),
                size: obj.data.len() as u64,
                version: obj.version.to_string(),
                last_modified: Some(obj.last_modified),
            })
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        Ok(objects.get(path).map(|obj| ObjectMeta {
            path: path.to_string(),
            size: obj.data.len() as u64,
            version: obj.version.to_string(),
            last_modified: Some(obj.last_modified),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("segment bytes");

        backend
            .put("a/b.seg", data.clone())
            .await
            .expect("put should succeed");

        let retrieved = backend.get("a/b.seg").await.expect("get should succeed");
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_replaces_and_bumps_version() {
        let backend = MemoryBackend::new();
        backend.put("k", Bytes::from("1")).await.expect("put");
        backend.put("k", Bytes::from("22")).await.expect("put");

        assert_eq!(backend.get("k").await.expect("get"), Bytes::from("22"));
        let meta = backend.head("k").await.expect("head").expect("present");
        assert_eq!(meta.version, "2");
        assert_eq!(meta.size, 2);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_reports_counts_in_order() {
        let backend = MemoryBackend::new();
        backend
            .put("old", Bytes::from("x"))
            .await
            .expect("seed");

        let mut batch = WriteBatch::new();
        batch.put("a", Bytes::from("aaa"));
        batch.put("b", Bytes::from("bb"));
        batch.delete("old");

        let stats = backend.commit(batch).await.expect("commit");
        assert_eq!(
            stats,
            CommitStats {
                deleted_count: 1,
                updated_count: 2,
                bytes_written: 5,
            }
        );
        assert!(backend.head("old").await.expect("head").is_none());
        assert_eq!(backend.get("b").await.expect("get"), Bytes::from("bb"));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MemoryBackend::new();
        for key in ["x/1", "x/2", "y/1"] {
            backend
                .put(key, Bytes::from(key))
                .await
                .expect("put");
        }

        assert_eq!(backend.list("x/").await.expect("list").len(), 2);
        assert_eq!(backend.list("y/").await.expect("list").len(), 1);
    }
}
