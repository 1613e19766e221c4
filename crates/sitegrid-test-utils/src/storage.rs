//! Test storage backends with operation tracing and failure injection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use sitegrid_core::error::{Error, Result};
use sitegrid_core::storage::{ObjectMeta, StorageBackend};
use sitegrid_core::MemoryBackend;

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Key read.
        path: String,
    },
    /// Head operation.
    Head {
        /// Key checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Key written.
        path: String,
        /// Bytes written.
        size: usize,
    },
    /// Delete operation.
    Delete {
        /// Key deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix listed.
        prefix: String,
    },
}

impl StorageOp {
    /// The key or prefix the operation touched.
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path }
            | Self::Head { path }
            | Self::Put { path, .. }
            | Self::Delete { path } => path,
            Self::List { prefix } => prefix,
        }
    }
}

/// In-memory backend that records every operation.
///
/// Failures can be injected by key prefix; they persist until cleared.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    inner: MemoryBackend,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_prefixes: Arc<Mutex<Vec<String>>>,
}

impl TracingMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded operations, in order.
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Keys written by `put`, in order.
    pub fn written_paths(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                StorageOp::Put { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Fails every operation on keys starting with `prefix`.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_prefixes.lock().expect("lock").push(prefix.into());
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.fail_prefixes.lock().expect("lock").clear();
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let prefixes = self.fail_prefixes.lock().expect("lock");
        if prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return Err(Error::Internal {
                message: format!("injected failure for path: {path}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.check_failure(path)?;
        self.record(StorageOp::Get {
            path: path.to_string(),
        });
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.check_failure(path)?;
        self.record(StorageOp::Put {
            path: path.to_string(),
            size: data.len(),
        });
        self.inner.put(path, data).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_failure(path)?;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.check_failure(prefix)?;
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });
        self.inner.list(prefix).await
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.check_failure(path)?;
        self.record(StorageOp::Head {
            path: path.to_string(),
        });
        self.inner.head(path).await
    }
}

/// Backend wrapper that fails selected operations once.
///
/// Write failures match keys containing a fragment, so a test can fail "the
/// first directory write" without knowing the generated key. Each armed
/// failure is consumed by the first matching operation.
#[derive(Debug, Default)]
pub struct FailingBackend {
    inner: MemoryBackend,
    fail_on_write: Mutex<HashSet<String>>,
    fail_on_delete: Mutex<HashSet<String>>,
    fail_on_read: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
}

impl FailingBackend {
    /// Wraps an empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing backend, sharing its contents.
    pub fn wrapping(inner: MemoryBackend) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Fails the next write to a key containing `fragment`.
    pub fn fail_on_write(&self, fragment: &str) {
        self.fail_on_write
            .lock()
            .expect("lock")
            .insert(fragment.to_string());
    }

    /// Fails the next delete of a key containing `fragment`.
    pub fn fail_on_delete(&self, fragment: &str) {
        self.fail_on_delete
            .lock()
            .expect("lock")
            .insert(fragment.to_string());
    }

    /// Fails the next read of a key containing `fragment`.
    pub fn fail_on_read(&self, fragment: &str) {
        self.fail_on_read
            .lock()
            .expect("lock")
            .insert(fragment.to_string());
    }

    /// Fails every operation until [`FailingBackend::recover`].
    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    /// Stops failing every operation.
    pub fn recover(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    fn should_fail(&self, armed: &Mutex<HashSet<String>>, path: &str) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        let mut armed = armed.lock().expect("lock");
        let hit = armed.iter().find(|f| path.contains(f.as_str())).cloned();
        hit.is_some_and(|f| armed.remove(&f))
    }

    fn injected(kind: &str, path: &str) -> Error {
        Error::storage(path, format!("injected {kind} failure"))
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        if self.should_fail(&self.fail_on_read, path) {
            return Err(Self::injected("read", path));
        }
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        if self.should_fail(&self.fail_on_write, path) {
            return Err(Self::injected("write", path));
        }
        self.inner.put(path, data).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if self.should_fail(&self.fail_on_delete, path) {
            return Err(Self::injected("delete", path));
        }
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Self::injected("list", prefix));
        }
        self.inner.list(prefix).await
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        if self.should_fail(&self.fail_on_read, path) {
            return Err(Self::injected("read", path));
        }
        self.inner.head(path).await
    }
}
