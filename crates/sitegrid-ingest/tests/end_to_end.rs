//! Ingest followed by retrieval, retirement and reload.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use sitegrid_core::storage_keys::{SegmentKey, StorageKey};
use sitegrid_core::{MachineUid, MemoryBackend, SiteModelId, SiteModelStorage, StorageBackend};
use sitegrid_ingest::metrics::MetricsSink;
use sitegrid_ingest::{
    AggregationTask, BatchStats, InMemoryFeed, IngestConfig, IngestError, Integrator,
    RetirementQueue, RetirementResult, SegmentRetirer,
};
use sitegrid_query::filter::ElevationType;
use sitegrid_query::{
    CellPassAttributeFilter, ClientLeafSubGrid, GridDataType, RetrievalRequest, RetrievalStatus,
    SubGridRetriever,
};
use sitegrid_store::machine::{Machine, MachineType};
use sitegrid_store::{CellAddress, SiteModel, SubGridKey};
use sitegrid_test_utils::{TracingMemoryBackend, add_machine, init_test_logging, pass};

#[derive(Default)]
struct CountingSink {
    completed: AtomicUsize,
    failed: AtomicUsize,
    enqueue_failures: AtomicUsize,
}

impl MetricsSink for CountingSink {
    fn batch_completed(&self, _stats: &BatchStats, _elapsed: Duration) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn batch_failed(&self, _kind: &'static str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn retirement_enqueue_failed(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn retirement_purged(&self, _result: &RetirementResult) {}
}

struct Harness {
    backend: Arc<MemoryBackend>,
    storage: SiteModelStorage,
    integrator: Integrator,
}

fn harness(model: SiteModel) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let storage = SiteModelStorage::new(backend.clone(), model.id());
    let integrator =
        Integrator::new(Arc::new(model), storage.clone(), IngestConfig::default()).unwrap();
    Harness {
        backend,
        storage,
        integrator,
    }
}

fn roller() -> Machine {
    Machine::new(
        MachineUid::from_bytes([9; 16]),
        "roller 9",
        MachineType::SoilCompactor,
        false,
    )
}

fn single_pass_task(
    site: SiteModelId,
    cell: CellAddress,
    secs: i64,
    height: f32,
) -> AggregationTask {
    let mut task = AggregationTask::new(site);
    let m = task.add_machine(roller()).unwrap();
    task.add_pass(cell, pass(secs, height, m));
    task
}

fn segment_keys(model: &SiteModel, key: SubGridKey) -> Vec<SegmentKey> {
    model
        .leaf(key)
        .unwrap()
        .directory()
        .segments
        .into_iter()
        .map(|s| s.key)
        .collect()
}

#[tokio::test]
async fn test_ingested_pass_is_retrievable_with_site_machine_index() {
    init_test_logging();
    let model = SiteModel::new(SiteModelId::generate());
    for name in ["dozer", "grader", "excavator"] {
        add_machine(&model, name, MachineType::Dozer);
    }
    let h = harness(model);
    let site = h.integrator.model().id();

    assert!(
        h.integrator
            .process_batch(vec![single_pass_task(site, CellAddress::new(2, 2), 0, 10.0)])
            .await
    );

    let model = h.integrator.model();
    let mut filter = CellPassAttributeFilter::new();
    filter.set_elevation_type(ElevationType::Last);
    let retriever = SubGridRetriever::new(
        model,
        RetrievalRequest::new(GridDataType::Height, filter),
        None,
    );
    let origin = SubGridKey::containing(2, 2);
    let mut tile = ClientLeafSubGrid::new(GridDataType::Height, origin);
    let status = retriever.retrieve(&mut tile, None).unwrap();

    assert_eq!(status, RetrievalStatus::NoError);
    assert_eq!(tile.get(2, 2).and_then(|v| v.height()), Some(10.0));
    assert_eq!(tile.source(2, 2).map(|s| s.machine_index), Some(3));
    assert!(model.state().existence.contains(origin));
    assert_eq!(model.state().roster.get(3).unwrap().uid, roller().uid);
}

#[tokio::test]
async fn test_reload_matches_live_model() {
    let h = harness(SiteModel::new(SiteModelId::generate()));
    let site = h.integrator.model().id();
    let mut task = single_pass_task(site, CellAddress::new(70, 5), 0, 3.0);
    let m = 0;
    let design = task.design_name("finished surface");
    let events = task.events_mut(m).unwrap();
    events.design_name.put(sitegrid_test_utils::ts(0), design);
    events.target_ccv.put(sitegrid_test_utils::ts(0), 80);
    assert!(h.integrator.process_batch(vec![task]).await);

    let loaded = SiteModel::load(&h.storage).await.unwrap();
    let key = SubGridKey::containing(70, 5);
    assert_eq!(loaded.leaf(key).unwrap().cell_pass_count(70 - key.origin_x, 5), 1);
    assert!(loaded.state().existence.contains(key));
    assert_eq!(loaded.state().roster.len(), 1);
    assert_eq!(loaded.state().metadata.machine_count, 1);
    assert_eq!(loaded.state().designs.id_of("finished surface"), Some(0));
    let live_events = h.integrator.model().machine_events(0).unwrap();
    assert_eq!(loaded.machine_events(0).unwrap(), live_events);
    assert_eq!(live_events.target_ccv.value_at(sitegrid_test_utils::ts(5)), Some(&80));
}

#[tokio::test]
async fn test_rewritten_segment_is_retired_and_purged() {
    init_test_logging();
    let h = harness(SiteModel::new(SiteModelId::generate()));
    let site = h.integrator.model().id();
    let cell = CellAddress::new(2, 2);
    let origin = SubGridKey::containing(2, 2);

    assert!(h.integrator.process_batch(vec![single_pass_task(site, cell, 0, 10.0)]).await);
    let first = segment_keys(h.integrator.model(), origin);
    assert_eq!(first.len(), 1);

    assert!(h.integrator.process_batch(vec![single_pass_task(site, cell, 60, 10.5)]).await);
    let second = segment_keys(h.integrator.model(), origin);
    assert_ne!(first, second);

    let queue = RetirementQueue::new(h.backend.clone());
    let pending = queue.pending(site).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].1.segment_keys, first);
    assert!(h.backend.head(first[0].path()).await.unwrap().is_some());

    let retirer = SegmentRetirer::new(h.backend.clone(), chrono::Duration::zero());
    let result = retirer
        .purge(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(result.entries_purged, 1);
    assert_eq!(result.segments_deleted, 1);

    let err = h.backend.get(first[0].path()).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(queue.pending(site).await.unwrap().is_empty());
    SiteModel::load(&h.storage).await.unwrap();
}

#[tokio::test]
async fn test_notification_reports_changes() {
    let model = SiteModel::new(SiteModelId::generate());
    let site = model.id();
    let feed = Arc::new(InMemoryFeed::new());
    let backend = Arc::new(MemoryBackend::new());
    let integrator = Integrator::new(
        Arc::new(model),
        SiteModelStorage::new(backend, site),
        IngestConfig::default(),
    )
    .unwrap()
    .with_notifier(feed.clone());

    let mut task = single_pass_task(site, CellAddress::new(33, 1), 0, 1.0);
    let design = task.design_name("subgrade");
    let events = task.events_mut(0).unwrap();
    events.target_pass_count.put(sitegrid_test_utils::ts(0), 6);
    events.design_name.put(sitegrid_test_utils::ts(0), design);
    assert!(integrator.process_batch(vec![task]).await);

    let again = single_pass_task(site, CellAddress::new(34, 1), 10, 1.1);
    assert!(integrator.process_batch(vec![again]).await);

    let notes = feed.drain();
    assert_eq!(notes.len(), 2);
    assert!(notes[0].machines_changed);
    assert!(notes[0].targets_changed);
    assert!(notes[0].designs_changed);
    assert!(notes[0].existence_delta.contains(SubGridKey::containing(33, 1)));
    assert!(!notes[1].machines_changed);
    assert!(!notes[1].targets_changed);
    assert!(!notes[1].designs_changed);
}

#[tokio::test]
async fn test_unmapped_machine_index_rejects_batch_without_writes() {
    init_test_logging();
    let backend = Arc::new(TracingMemoryBackend::new());
    let site = SiteModelId::generate();
    let sink = Arc::new(CountingSink::default());
    let integrator = Integrator::new(
        Arc::new(SiteModel::new(site)),
        SiteModelStorage::new(backend.clone(), site),
        IngestConfig::default(),
    )
    .unwrap()
    .with_metrics(sink.clone());

    let mut task = single_pass_task(site, CellAddress::new(0, 0), 0, 1.0);
    task.add_pass(CellAddress::new(1, 0), pass(1, 1.0, 1));

    let err = integrator.try_process_batch(vec![task.clone()]).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::InconsistentIndexMapping { index: Some(1), .. }
    ));
    assert!(!integrator.process_batch(vec![task]).await);

    assert!(backend.written_paths().is_empty());
    assert!(integrator.model().spatial().is_empty());
    assert!(integrator.model().state().roster.is_empty());
    assert_eq!(sink.failed.load(Ordering::SeqCst), 1);
    assert_eq!(sink.completed.load(Ordering::SeqCst), 0);
    assert_eq!(sink.enqueue_failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_multi_task_batch_merges_machines() {
    let h = harness(SiteModel::new(SiteModelId::generate()));
    let site = h.integrator.model().id();
    let first = single_pass_task(site, CellAddress::new(5, 5), 0, 2.0);
    let second = single_pass_task(site, CellAddress::new(5, 5), 30, 2.2);

    let stats = h.integrator.try_process_batch(vec![first, second]).await.unwrap();

    assert_eq!(stats.tasks, 2);
    assert_eq!(stats.machines, 1);
    assert_eq!(stats.passes_added, 2);
    assert_eq!(stats.leaves_written, 1);
    let leaf = h
        .integrator
        .model()
        .leaf(SubGridKey::containing(5, 5))
        .unwrap();
    assert_eq!(leaf.cell_pass_count(5, 5), 2);
    assert_eq!(leaf.latest_cell(5, 5).height.unwrap().value, 2.2);
}
