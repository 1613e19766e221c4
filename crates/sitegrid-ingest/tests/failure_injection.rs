//! Failure injection for ingest commit ordering.
//!
//! Each test interrupts a batch at one commit stage and checks that the
//! durable store stays referentially intact, that the live model is
//! unchanged, and that a reload sees only fully committed data.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sitegrid_core::storage_keys::StorageKey;
use sitegrid_core::{MachineUid, SiteModelId, SiteModelStorage, StorageBackend};
use sitegrid_ingest::metrics::MetricsSink;
use sitegrid_ingest::{
    AggregationTask, BatchStats, IngestConfig, Integrator, RetirementQueue, RetirementResult,
};
use sitegrid_store::codec::LeafDirectory;
use sitegrid_store::machine::{Machine, MachineType};
use sitegrid_store::{CellAddress, SiteModel, SubGridKey};
use sitegrid_test_utils::{FailingBackend, init_test_logging, pass};

#[derive(Default)]
struct EnqueueFailures(AtomicUsize);

impl MetricsSink for EnqueueFailures {
    fn batch_completed(&self, _stats: &BatchStats, _elapsed: Duration) {}

    fn batch_failed(&self, _kind: &'static str) {}

    fn retirement_enqueue_failed(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn retirement_purged(&self, _result: &RetirementResult) {}
}

struct Setup {
    backend: Arc<FailingBackend>,
    storage: SiteModelStorage,
    integrator: Integrator,
}

impl Setup {
    fn new() -> Self {
        init_test_logging();
        let site = SiteModelId::generate();
        let backend = Arc::new(FailingBackend::new());
        let storage = SiteModelStorage::new(backend.clone(), site);
        let integrator = Integrator::new(
            Arc::new(SiteModel::new(site)),
            storage.clone(),
            IngestConfig::default(),
        )
        .unwrap();
        Self {
            backend,
            storage,
            integrator,
        }
    }

    fn site(&self) -> SiteModelId {
        self.integrator.model().id()
    }

    fn task(&self, passes: &[(u32, u32, i64)]) -> AggregationTask {
        let mut task = AggregationTask::new(self.site());
        let m = task
            .add_machine(Machine::new(
                MachineUid::from_bytes([4; 16]),
                "grader 4",
                MachineType::Grader,
                false,
            ))
            .unwrap();
        for (x, y, secs) in passes {
            task.add_pass(CellAddress::new(*x, *y), pass(*secs, 1.0, m));
        }
        task
    }

    async fn segment_paths(&self) -> Vec<String> {
        self.storage
            .list_paths(&format!("site-model={}/", self.site()))
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.ends_with(".seg"))
            .collect()
    }

    /// Asserts every directory lists only segments present in the store and
    /// returns the number of referenced segments.
    async fn assert_directories_resolve(&self) -> usize {
        let mut referenced = 0;
        for path in self.storage.list_directory_paths().await.unwrap() {
            let bytes = self.backend.get(&path).await.unwrap();
            let directory: LeafDirectory = serde_json::from_slice(&bytes).unwrap();
            for segment in &directory.segments {
                assert!(
                    self.backend.head(segment.key.path()).await.unwrap().is_some(),
                    "{path} references absent segment {}",
                    segment.key
                );
                referenced += 1;
            }
        }
        referenced
    }
}

#[tokio::test]
async fn test_crash_between_segments_and_directories() {
    let s = Setup::new();
    assert!(s.integrator.process_batch(vec![s.task(&[(2, 2, 0)])]).await);

    s.backend.fail_on_write("directory.json");
    let rejected = s.task(&[(2, 2, 60), (40, 2, 60)]);
    assert!(!s.integrator.process_batch(vec![rejected]).await);

    let referenced = s.assert_directories_resolve().await;
    assert_eq!(referenced, 1);
    assert!(s.segment_paths().await.len() > referenced);

    let live = s.integrator.model();
    assert_eq!(live.leaf(SubGridKey::containing(2, 2)).unwrap().cell_pass_count(2, 2), 1);
    assert!(live.leaf(SubGridKey::containing(40, 2)).is_none());

    let loaded = SiteModel::load(&s.storage).await.unwrap();
    assert_eq!(loaded.leaf(SubGridKey::containing(2, 2)).unwrap().cell_pass_count(2, 2), 1);
    assert!(loaded.leaf(SubGridKey::containing(40, 2)).is_none());
}

#[tokio::test]
async fn test_crash_during_segment_writes() {
    let s = Setup::new();
    s.backend.fail_on_write(".seg");
    assert!(!s.integrator.process_batch(vec![s.task(&[(7, 7, 0)])]).await);

    assert_eq!(s.assert_directories_resolve().await, 0);
    assert!(s.storage.list_directory_paths().await.unwrap().is_empty());
    assert!(s.integrator.model().spatial().is_empty());

    assert!(s.integrator.process_batch(vec![s.task(&[(7, 7, 0)])]).await);
    assert_eq!(s.assert_directories_resolve().await, 1);
}

#[tokio::test]
async fn test_event_commit_failure_writes_no_spatial_data() {
    let s = Setup::new();
    let mut task = s.task(&[(1, 1, 0)]);
    task.events_mut(0)
        .unwrap()
        .target_ccv
        .put(sitegrid_test_utils::ts(0), 40);

    s.backend.fail_on_write("/events/");
    assert!(!s.integrator.process_batch(vec![task]).await);

    assert!(s.segment_paths().await.is_empty());
    assert!(s.integrator.model().machine_events(0).is_none());
    assert!(s.integrator.model().state().roster.is_empty());
}

#[tokio::test]
async fn test_crash_before_existence_map_is_recovered_on_load() {
    let s = Setup::new();
    s.backend.fail_on_write("existence.json");
    let task = s.task(&[(3, 3, 0)]);
    assert!(!s.integrator.process_batch(vec![task.clone()]).await);

    let key = SubGridKey::containing(3, 3);
    assert!(!s.integrator.model().state().existence.contains(key));
    s.assert_directories_resolve().await;

    let loaded = SiteModel::load(&s.storage).await.unwrap();
    assert!(loaded.state().existence.contains(key));

    assert!(s.integrator.process_batch(vec![task]).await);
    assert!(s.integrator.model().state().existence.contains(key));
    let reloaded = SiteModel::load(&s.storage).await.unwrap();
    assert_eq!(reloaded.leaf(key).unwrap().cell_pass_count(3, 3), 1);
}

#[tokio::test]
async fn test_retirement_enqueue_failure_keeps_batch() {
    let site = SiteModelId::generate();
    let backend = Arc::new(FailingBackend::new());
    let storage = SiteModelStorage::new(backend.clone(), site);
    let sink = Arc::new(EnqueueFailures::default());
    let integrator = Integrator::new(
        Arc::new(SiteModel::new(site)),
        storage.clone(),
        IngestConfig::default(),
    )
    .unwrap()
    .with_metrics(sink.clone());

    let task = |secs| {
        let mut task = AggregationTask::new(site);
        let dozer = Machine::new(MachineUid::from_bytes([5; 16]), "m", MachineType::Dozer, false);
        let m = task.add_machine(dozer).unwrap();
        task.add_pass(CellAddress::new(0, 0), pass(secs, 1.0, m));
        task
    };

    assert!(integrator.process_batch(vec![task(0)]).await);
    backend.fail_on_write("retirement/");
    assert!(integrator.process_batch(vec![task(10)]).await);

    assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    assert!(RetirementQueue::new(backend.clone()).pending(site).await.unwrap().is_empty());
    let loaded = SiteModel::load(&storage).await.unwrap();
    assert_eq!(loaded.leaf(SubGridKey::containing(0, 0)).unwrap().cell_pass_count(0, 0), 2);
}
