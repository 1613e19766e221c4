//! Worker pool running integrators.
//!
//! Each worker owns a bounded queue and processes one batch end to end
//! before taking the next. Batches are routed by site model, so batches for
//! one site model always land on the same worker and never run
//! concurrently.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use sitegrid_core::SiteModelId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::integrator::Integrator;
use crate::task::AggregationTask;

const WORKER_QUEUE_CAPACITY: usize = 64;

struct IngestJob {
    integrator: Arc<Integrator>,
    tasks: Vec<AggregationTask>,
    respond_to: oneshot::Sender<bool>,
}

/// A fixed pool of ingest workers.
pub struct IngestWorkerPool {
    senders: Vec<mpsc::Sender<IngestJob>>,
    handles: Vec<JoinHandle<()>>,
    integrators: RwLock<HashMap<SiteModelId, Arc<Integrator>>>,
}

impl std::fmt::Debug for IngestWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestWorkerPool")
            .field("workers", &self.senders.len())
            .field("site_models", &self.integrators.read().len())
            .finish()
    }
}

impl IngestWorkerPool {
    /// Spawns `config.worker_count` workers on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidConfig`] if `config` is invalid.
    pub fn start(config: &IngestConfig) -> Result<Self> {
        config.validate()?;
        let mut senders = Vec::with_capacity(config.worker_count);
        let mut handles = Vec::with_capacity(config.worker_count);
        for worker in 0..config.worker_count {
            let (tx, mut rx) = mpsc::channel::<IngestJob>(WORKER_QUEUE_CAPACITY);
            handles.push(tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let accepted = job.integrator.process_batch(job.tasks).await;
                    if job.respond_to.send(accepted).is_err() {
                        tracing::debug!(worker, "ingest submitter went away before completion");
                    }
                }
                tracing::debug!(worker, "ingest worker stopped");
            }));
            senders.push(tx);
        }
        tracing::info!(workers = config.worker_count, "started ingest workers");
        Ok(Self {
            senders,
            handles,
            integrators: RwLock::new(HashMap::new()),
        })
    }

    /// Routes batches for the integrator's site model to it, replacing any
    /// earlier registration.
    pub fn register(&self, integrator: Arc<Integrator>) {
        let site_model = integrator.model().id();
        self.integrators.write().insert(site_model, integrator);
    }

    /// Number of workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    fn worker_for(&self, site_model: SiteModelId) -> usize {
        let mut hasher = DefaultHasher::new();
        site_model.hash(&mut hasher);
        let count = self.senders.len() as u64;
        usize::try_from(hasher.finish() % count).unwrap_or(0)
    }

    /// Queues a batch and waits for its outcome.
    ///
    /// Returns the integrator's verdict: false means the batch was rejected
    /// and its source files must be redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::EmptyBatch`] for no tasks,
    /// [`IngestError::UnknownSiteModel`] if no integrator is registered, and
    /// [`IngestError::WorkerPoolClosed`] if the worker is gone.
    pub async fn submit(&self, tasks: Vec<AggregationTask>) -> Result<bool> {
        let site_model = tasks
            .first()
            .map(|t| t.site_model)
            .ok_or(IngestError::EmptyBatch)?;
        let integrator = self
            .integrators
            .read()
            .get(&site_model)
            .cloned()
            .ok_or(IngestError::UnknownSiteModel(site_model))?;

        let (tx, rx) = oneshot::channel();
        let job = IngestJob {
            integrator,
            tasks,
            respond_to: tx,
        };
        self.senders[self.worker_for(site_model)]
            .send(job)
            .await
            .map_err(|_| IngestError::WorkerPoolClosed)?;
        rx.await.map_err(|_| IngestError::WorkerPoolClosed)
    }

    /// Stops accepting batches and waits for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "ingest worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegrid_core::{MachineUid, MemoryBackend, SiteModelStorage};
    use sitegrid_store::machine::{Machine, MachineType};
    use sitegrid_store::{CellAddress, CellPass, SiteModel};

    fn integrator_for(site: SiteModelId) -> Arc<Integrator> {
        let storage = SiteModelStorage::new(Arc::new(MemoryBackend::new()), site);
        Arc::new(
            Integrator::new(Arc::new(SiteModel::new(site)), storage, IngestConfig::default())
                .unwrap(),
        )
    }

    fn task(site: SiteModelId, secs: i64) -> AggregationTask {
        let mut task = AggregationTask::new(site);
        let paver = Machine::new(
            MachineUid::from_bytes([1; 16]),
            "paver",
            MachineType::AsphaltPaver,
            false,
        );
        let m = task.add_machine(paver).unwrap();
        let time = chrono::DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap();
        task.add_pass(CellAddress::new(1, 1), CellPass::new(time, 2.0, m));
        task
    }

    #[tokio::test]
    async fn test_batches_for_one_site_model_are_serialized() {
        let pool = Arc::new(
            IngestWorkerPool::start(&IngestConfig {
                worker_count: 3,
                ..IngestConfig::default()
            })
            .unwrap(),
        );
        let site = SiteModelId::generate();
        let integrator = integrator_for(site);
        pool.register(Arc::clone(&integrator));

        let mut joins = Vec::new();
        for secs in 0..8 {
            let pool = Arc::clone(&pool);
            joins.push(tokio::spawn(async move { pool.submit(vec![task(site, secs)]).await }));
        }
        for join in joins {
            assert!(join.await.unwrap().unwrap());
        }

        let leaf = integrator
            .model()
            .leaf(sitegrid_store::SubGridKey::containing(1, 1))
            .unwrap();
        assert_eq!(leaf.cell_pass_count(1, 1), 8);
        assert_eq!(integrator.model().state().roster.len(), 1);

        let pool = Arc::try_unwrap(pool).unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregistered_site_model_is_rejected() {
        let pool = IngestWorkerPool::start(&IngestConfig::default()).unwrap();
        let err = pool.submit(vec![task(SiteModelId::generate(), 0)]).await.unwrap_err();
        assert!(matches!(err, IngestError::UnknownSiteModel(_)));
        assert!(matches!(
            pool.submit(Vec::new()).await,
            Err(IngestError::EmptyBatch)
        ));
        pool.shutdown().await;
    }
}
