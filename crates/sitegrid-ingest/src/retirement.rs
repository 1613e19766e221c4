//! Retirement of superseded segments.
//!
//! Every ingest that rewrites a segment leaves the previous version's bytes
//! behind. Their keys are queued as one entry per batch under
//! `retirement/`, and a background [`SegmentRetirer`] deletes them once the
//! entry is older than the retirement delay, giving in-flight readers of the
//! old directory time to finish.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitegrid_core::storage_keys::{RetirementKey, SegmentKey, StorageKey};
use sitegrid_core::{Result, SiteModelId, StorageBackend, WriteBatch, json_bytes};
use ulid::Ulid;

use crate::metrics::{MetricsSink, NoopMetricsSink};

/// One batch's superseded segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetirementEntry {
    /// Site model the segments belong to.
    pub site_model: SiteModelId,
    /// Commit time of the batch that superseded them.
    pub inserted_at: DateTime<Utc>,
    /// Keys to delete.
    pub segment_keys: Vec<SegmentKey>,
}

/// Appends retirement entries.
#[derive(Clone)]
pub struct RetirementQueue {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for RetirementQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetirementQueue").finish_non_exhaustive()
    }
}

impl RetirementQueue {
    /// Creates a queue over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Queues `segment_keys` of `site_model`, stamped `inserted_at`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the entry cannot be written.
    pub async fn enqueue(
        &self,
        site_model: SiteModelId,
        segment_keys: Vec<SegmentKey>,
        inserted_at: DateTime<Utc>,
    ) -> Result<RetirementKey> {
        let key = RetirementKey::new(site_model, &Ulid::new().to_string());
        let entry = RetirementEntry {
            site_model,
            inserted_at,
            segment_keys,
        };
        let mut batch = WriteBatch::new();
        batch.put(key.to_string(), json_bytes(&entry)?);
        self.backend.commit(batch).await?;
        tracing::debug!(
            site_model = %site_model,
            entry = %key,
            segments = entry.segment_keys.len(),
            "queued superseded segments"
        );
        Ok(key)
    }

    /// Entries queued for `site_model`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub async fn pending(
        &self,
        site_model: SiteModelId,
    ) -> Result<Vec<(RetirementKey, RetirementEntry)>> {
        read_entries(self.backend.as_ref(), &RetirementKey::prefix(site_model)).await
    }
}

async fn read_entries(
    backend: &dyn StorageBackend,
    prefix: &str,
) -> Result<Vec<(RetirementKey, RetirementEntry)>> {
    let mut paths: Vec<String> = backend
        .list(prefix)
        .await?
        .into_iter()
        .map(|meta| meta.path)
        .collect();
    paths.sort();

    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = backend.get(&path).await?;
        let entry: RetirementEntry = serde_json::from_slice(&bytes)?;
        entries.push((RetirementKey::from_raw(path), entry));
    }
    Ok(entries)
}

/// Result of one purge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetirementResult {
    /// Entries fully processed and removed.
    pub entries_purged: u64,
    /// Entries younger than the retirement delay.
    pub entries_deferred: u64,
    /// Segment keys deleted (absent keys count as deleted).
    pub segments_deleted: u64,
    /// Errors encountered (the purge continues past them).
    pub errors: Vec<String>,
}

impl RetirementResult {
    /// Merges another result into this one.
    pub fn merge(&mut self, other: Self) {
        self.entries_purged += other.entries_purged;
        self.entries_deferred += other.entries_deferred;
        self.segments_deleted += other.segments_deleted;
        self.errors.extend(other.errors);
    }

    /// Returns true if any errors were encountered.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Deletes segments queued for retirement.
pub struct SegmentRetirer {
    backend: Arc<dyn StorageBackend>,
    delay: chrono::Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for SegmentRetirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentRetirer")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl SegmentRetirer {
    /// Creates a retirer purging entries older than `delay`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, delay: chrono::Duration) -> Self {
        Self {
            backend,
            delay,
            metrics: Arc::new(NoopMetricsSink),
        }
    }

    /// Reports purge results to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Purges every entry inserted at or before `now - delay`.
    ///
    /// An entry is removed only after all of its segment keys are gone, so a
    /// failed delete is retried by the next pass.
    ///
    /// # Errors
    ///
    /// Returns a storage error only if the queue cannot be listed.
    pub async fn purge(&self, now: DateTime<Utc>) -> Result<RetirementResult> {
        let mut paths: Vec<String> = self
            .backend
            .list(RetirementKey::root())
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .collect();
        paths.sort();

        let cutoff = now - self.delay;
        let mut result = RetirementResult::default();
        for path in paths {
            result.merge(self.purge_entry(RetirementKey::from_raw(path), cutoff).await);
        }

        tracing::info!(
            entries_purged = result.entries_purged,
            entries_deferred = result.entries_deferred,
            segments_deleted = result.segments_deleted,
            errors = result.errors.len(),
            metric = "sitegrid_retirement_purge_completed",
            "retirement purge completed"
        );
        self.metrics.retirement_purged(&result);
        Ok(result)
    }

    async fn purge_entry(&self, key: RetirementKey, cutoff: DateTime<Utc>) -> RetirementResult {
        let mut result = RetirementResult::default();
        let entry: RetirementEntry = match self.backend.get(key.path()).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entry) => entry,
                Err(e) => {
                    result.errors.push(format!("decode {key}: {e}"));
                    return result;
                }
            },
            Err(e) if e.is_not_found() => return result,
            Err(e) => {
                result.errors.push(format!("read {key}: {e}"));
                return result;
            }
        };

        if entry.inserted_at > cutoff {
            result.entries_deferred += 1;
            return result;
        }

        let mut complete = true;
        for segment in &entry.segment_keys {
            match self.backend.delete(segment.path()).await {
                Ok(()) => result.segments_deleted += 1,
                Err(e) if e.is_not_found() => result.segments_deleted += 1,
                Err(e) => {
                    complete = false;
                    result.errors.push(format!("delete {segment}: {e}"));
                }
            }
        }
        if !complete {
            return result;
        }

        match self.backend.delete(key.path()).await {
            Ok(()) => {
                tracing::info!(
                    site_model = %entry.site_model,
                    entry = %key,
                    segments = entry.segment_keys.len(),
                    "purged retirement entry"
                );
                result.entries_purged += 1;
            }
            Err(e) => result.errors.push(format!("delete {key}: {e}")),
        }
        result
    }

    /// Runs [`SegmentRetirer::purge`] every `period` until the task is
    /// aborted.
    #[must_use]
    pub fn spawn(self: Arc<Self>, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.purge(Utc::now()).await {
                    tracing::warn!(error = %e, "retirement purge failed to list queue");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;
    use sitegrid_core::MemoryBackend;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    async fn seed_segment(backend: &MemoryBackend, path: &str) -> SegmentKey {
        let mut batch = WriteBatch::new();
        batch.put(path, Bytes::from_static(b"seg"));
        backend.commit(batch).await.unwrap();
        SegmentKey::from_raw(path)
    }

    #[tokio::test]
    async fn test_young_entries_are_deferred() {
        let backend = Arc::new(MemoryBackend::new());
        let site = SiteModelId::generate();
        let key = seed_segment(&backend, "a.seg").await;

        let queue = RetirementQueue::new(backend.clone());
        queue.enqueue(site, vec![key.clone()], at(0)).await.unwrap();

        let retirer = SegmentRetirer::new(backend.clone(), chrono::Duration::seconds(600));
        let result = retirer.purge(at(60)).await.unwrap();
        assert_eq!(result.entries_deferred, 1);
        assert!(backend.head(key.path()).await.unwrap().is_some());
        assert_eq!(queue.pending(site).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_old_entries_delete_segments_then_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let site = SiteModelId::generate();
        let first = seed_segment(&backend, "a.seg").await;
        let second = seed_segment(&backend, "b.seg").await;

        let queue = RetirementQueue::new(backend.clone());
        queue
            .enqueue(site, vec![first.clone(), second.clone()], at(0))
            .await
            .unwrap();

        let retirer = SegmentRetirer::new(backend.clone(), chrono::Duration::seconds(600));
        let result = retirer.purge(at(601)).await.unwrap();
        assert_eq!(result.entries_purged, 1);
        assert_eq!(result.segments_deleted, 2);
        assert!(!result.has_errors());
        assert!(backend.head(first.path()).await.unwrap().is_none());
        assert!(queue.pending(site).await.unwrap().is_empty());
    }
}
