//! The integrator: one batch of aggregation tasks into one site model.
//!
//! A batch is integrated all-or-nothing. Everything is staged on copies of
//! the live state and committed to the durable store in a fixed order:
//!
//! 1. event lists and the design-name table
//! 2. segment bytes
//! 3. segment directories
//! 4. existence map, roster and metadata
//!
//! The live model is updated only after the last commit succeeds, so a
//! failure at any step leaves readers on the previous state. A directory is
//! never written before the segments it lists, so an interrupted batch leaves
//! only unreferenced segment bytes behind.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sitegrid_core::observability::ingest_span;
use sitegrid_core::storage_keys::{DocumentKey, SegmentKey, SiteModelDocument};
use sitegrid_core::{CommitStats, SiteModelStorage, WriteBatch, json_bytes};
use sitegrid_store::{LeafSubGrid, SiteModel};
use tracing::Instrument;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::events::{event_writes, merge_events};
use crate::grouping::group_tasks;
use crate::machines::resolve_machines;
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::notify::{ChangeNotification, ChangeNotificationSink, NullNotificationSink};
use crate::retirement::RetirementQueue;
use crate::task::AggregationTask;

/// Counts describing one integrated batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Tasks in the batch.
    pub tasks: usize,
    /// Distinct machines in the batch.
    pub machines: usize,
    /// Machines added to the roster.
    pub machines_created: usize,
    /// Cell passes added to leaves.
    pub passes_added: usize,
    /// Cells that received passes.
    pub cells_touched: usize,
    /// Leaves written.
    pub leaves_written: usize,
    /// Segments written.
    pub segments_written: usize,
    /// Segments split for exceeding the pass limit.
    pub segments_cleaved: usize,
    /// Superseded segments queued for retirement.
    pub segments_retired: usize,
    /// Storage counts across every commit of the batch.
    pub commit: CommitStats,
}

/// Integrates batches into one site model.
pub struct Integrator {
    model: Arc<SiteModel>,
    storage: SiteModelStorage,
    config: IngestConfig,
    retirement: RetirementQueue,
    notifier: Arc<dyn ChangeNotificationSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for Integrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integrator")
            .field("site_model", &self.model.id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Integrator {
    /// Creates an integrator for `model`, persisting through `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidConfig`] if `config` is invalid, or
    /// [`IngestError::MixedSiteModels`] if `storage` is scoped to another
    /// site model.
    pub fn new(
        model: Arc<SiteModel>,
        storage: SiteModelStorage,
        config: IngestConfig,
    ) -> Result<Self> {
        config.validate()?;
        if storage.site_model_id() != model.id() {
            return Err(IngestError::MixedSiteModels {
                expected: model.id(),
                found: storage.site_model_id(),
            });
        }
        let retirement = RetirementQueue::new(Arc::clone(storage.backend()));
        Ok(Self {
            model,
            storage,
            config,
            retirement,
            notifier: Arc::new(NullNotificationSink),
            metrics: Arc::new(NoopMetricsSink),
        })
    }

    /// Publishes change notifications to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Reports measurements to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The live site model.
    #[must_use]
    pub fn model(&self) -> &Arc<SiteModel> {
        &self.model
    }

    /// Integrates `tasks`, returning false if the batch was rejected.
    ///
    /// On false nothing of the batch is visible to readers; the source TAG
    /// files must be redelivered.
    pub async fn process_batch(&self, tasks: Vec<AggregationTask>) -> bool {
        let batch_size = tasks.len();
        let site_model = self.model.id();
        let started = Instant::now();
        let span = ingest_span(site_model, batch_size);

        match self.try_process_batch(tasks).instrument(span).await {
            Ok(stats) => {
                tracing::info!(
                    site_model = %site_model,
                    batch_size,
                    passes_added = stats.passes_added,
                    leaves = stats.leaves_written,
                    segments = stats.segments_written,
                    retired = stats.segments_retired,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "integrated batch"
                );
                self.metrics.batch_completed(&stats, started.elapsed());
                true
            }
            Err(e) => {
                tracing::error!(
                    site_model = %site_model,
                    batch_size,
                    kind = e.kind(),
                    error = %e,
                    "ingest batch failed; source files must be redelivered"
                );
                self.metrics.batch_failed(e.kind());
                false
            }
        }
    }

    /// Integrates `tasks`.
    ///
    /// # Errors
    ///
    /// Returns the first error of any step; the live model is unchanged.
    pub async fn try_process_batch(&self, tasks: Vec<AggregationTask>) -> Result<BatchStats> {
        let site_model = self.model.id();
        if let Some(task) = tasks.iter().find(|t| t.site_model != site_model) {
            return Err(IngestError::MixedSiteModels {
                expected: site_model,
                found: task.site_model,
            });
        }

        let batch = group_tasks(tasks)?;
        let mut stats = BatchStats {
            tasks: batch.task_count,
            machines: batch.machines.len(),
            ..BatchStats::default()
        };

        let live_roster = self.model.roster_snapshot();
        let merged = merge_events(&self.model, &live_roster, &batch)?;
        let resolution = resolve_machines(live_roster, &batch)?;
        stats.machines_created = resolution.created;

        let events = event_writes(
            site_model,
            &merged,
            resolution.mapping.targets(),
            &resolution.roster,
        )?;
        stats.commit.merge(self.storage.commit(events, "events").await?);

        let mut tree = batch.pass_tree;
        resolution.mapping.apply(&mut tree)?;
        let touched = tree.existence();

        let mut segments = WriteBatch::new();
        let mut directories = WriteBatch::new();
        let mut leaves: Vec<Arc<LeafSubGrid>> = Vec::with_capacity(tree.leaf_count());
        let mut retired: Vec<SegmentKey> = Vec::new();
        for (key, incoming) in tree.leaves() {
            let mut leaf = match self.model.leaf(key) {
                Some(live) => (*live).clone(),
                None => LeafSubGrid::new(key),
            };
            let outcome = leaf.merge_stacks(incoming.stacks());
            stats.passes_added += outcome.passes_added;
            stats.cells_touched += outcome.cells_touched;
            stats.segments_cleaved += leaf.cleave_segments(self.config.max_passes_per_segment);
            if !leaf.is_dirty() {
                continue;
            }

            let commit = leaf.prepare_commit(site_model)?;
            stats.segments_written += commit.segment_writes.len();
            for (segment, bytes) in commit.segment_writes {
                segments.put(segment.to_string(), bytes);
            }
            directories.put(commit.directory_key.to_string(), commit.directory);
            retired.extend(commit.retired);
            leaves.push(Arc::new(leaf));
        }
        stats.leaves_written = leaves.len();

        let mut state = self.model.state().clone();
        state.roster = resolution.roster;
        state.designs = merged.designs;
        state.existence.union_with(&touched);
        state.metadata.include(&touched);
        state.metadata.machine_count = state.roster.len();
        state.metadata.last_modified = Some(Utc::now());

        let mut documents = WriteBatch::new();
        documents.put(
            DocumentKey::new(site_model, SiteModelDocument::ExistenceMap).to_string(),
            json_bytes(&state.existence)?,
        );
        documents.put(
            DocumentKey::new(site_model, SiteModelDocument::Machines).to_string(),
            json_bytes(&state.roster)?,
        );
        documents.put(
            DocumentKey::new(site_model, SiteModelDocument::Metadata).to_string(),
            json_bytes(&state.metadata)?,
        );

        stats.commit.merge(self.storage.commit(segments, "segments").await?);
        stats
            .commit
            .merge(self.storage.commit(directories, "directories").await?);
        stats
            .commit
            .merge(self.storage.commit(documents, "metadata").await?);

        for (lists, index) in merged.lists.into_iter().zip(resolution.mapping.targets()) {
            if let Some(lists) = lists {
                self.model.publish_machine_events(*index, Arc::new(lists));
            }
        }
        for leaf in leaves {
            self.model.spatial().publish(leaf);
        }
        let committed_at = state.metadata.last_modified.unwrap_or_else(Utc::now);
        self.model.update_state(|live| *live = state);

        stats.segments_retired = retired.len();
        if self.config.retirement_enabled && !retired.is_empty() {
            if let Err(e) = self
                .retirement
                .enqueue(site_model, retired, committed_at)
                .await
            {
                tracing::error!(
                    site_model = %site_model,
                    segments = stats.segments_retired,
                    critical = true,
                    error = %e,
                    "failed to queue superseded segments for retirement"
                );
                self.metrics.retirement_enqueue_failed();
            }
        }

        self.notifier.notify(ChangeNotification {
            site_model,
            existence_delta: touched,
            machines_changed: resolution.machines_changed,
            targets_changed: merged.targets_changed,
            designs_changed: merged.designs_changed,
        });

        Ok(stats)
    }
}
