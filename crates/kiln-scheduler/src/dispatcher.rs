//! Dispatcher: the entry point used by intake to get builds run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};

use kiln_core::{BuildExecutor, BuildId, BuildRecord, Error, Notifier, Result, TriggerPayload};
use kiln_db::BuildRepo;
use tracing::{debug, info};

use crate::queue::DispatchQueue;
use crate::records::{BlameEntry, BuildRecords};
use crate::worker::{Worker, WorkerHandle, WorkerSlot, WorkerStatus};

/// Accepts builds, queues them and keeps a worker around while there is work.
pub struct Dispatcher {
    records: Arc<BuildRecords>,
    queue: Arc<DispatchQueue>,
    executor: Arc<dyn BuildExecutor>,
    notifier: Arc<dyn Notifier>,
    slot: Arc<WorkerSlot>,
    /// Serializes rebuilds so two requests cannot queue the same build.
    rebuilds: tokio::sync::Mutex<()>,
    next_worker_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        repo: Arc<dyn BuildRepo>,
        executor: Arc<dyn BuildExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            records: Arc::new(BuildRecords::new(repo)),
            queue: Arc::new(DispatchQueue::new()),
            executor,
            notifier,
            slot: Arc::new(WorkerSlot::new()),
            rebuilds: tokio::sync::Mutex::new(()),
            next_worker_id: AtomicU64::new(1),
        }
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    fn slot(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.slot.lock()
    }

    /// Persist a new build from `payload`, queue it and make sure a worker runs.
    pub async fn submit_new(&self, payload: TriggerPayload) -> Result<BuildId> {
        let record = self.records.create(payload).await?;
        self.queue.enqueue(record.id);
        self.ensure_worker();
        Ok(record.id)
    }

    /// Run an existing build again.
    ///
    /// Fails with [`Error::Conflict`] while the build is still queued or executing.
    pub async fn resubmit(&self, id: &str) -> Result<BuildId> {
        let _rebuilding = self.rebuilds.lock().await;
        let mut record = self.records.load_by_id(id).await?;
        if self.is_pending(record.id) {
            return Err(Error::Conflict(format!(
                "build {} is already queued or running",
                record.id
            )));
        }

        self.records.begin_attempt(&mut record).await?;
        self.queue.enqueue(record.id);
        info!(build_id = %record.id, "Rebuild queued");
        self.ensure_worker();
        Ok(record.id)
    }

    /// Queued, or dequeued by the worker and not finished.
    fn is_pending(&self, id: BuildId) -> bool {
        let slot = self.slot();
        self.queue.contains(id)
            || slot
                .as_ref()
                .and_then(WorkerHandle::claimed_build)
                .is_some_and(|claimed| claimed == id)
    }

    /// Start a worker unless one is already running.
    pub fn ensure_worker(&self) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(WorkerHandle::is_running) {
            debug!("Worker already running");
            return;
        }

        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let worker = Worker::new(
            id,
            self.slot.clone(),
            self.records.clone(),
            self.queue.clone(),
            self.executor.clone(),
            self.notifier.clone(),
        );
        *slot = Some(worker.spawn());
    }

    pub fn worker_status(&self) -> WorkerStatus {
        self.slot()
            .as_ref()
            .map_or(WorkerStatus::Idle, WorkerHandle::status)
    }

    /// Wait until the queue is empty and no worker is running.
    pub async fn wait_idle(&self) -> Result<()> {
        loop {
            let handle = self.slot().clone();
            match handle {
                Some(handle) if handle.is_running() => {
                    handle.join().await?;
                }
                _ if !self.queue.has_pending() => return Ok(()),
                _ => self.ensure_worker(),
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<BuildRecord> {
        self.records.load_by_id(id).await
    }

    pub async fn list(&self) -> Result<Vec<BuildRecord>> {
        self.records.list_all().await
    }

    pub async fn blame(&self) -> Result<Vec<BlameEntry>> {
        self.records.blame().await
    }

    /// Fails if storage does not answer.
    pub async fn check_storage(&self) -> Result<()> {
        self.records.check_storage().await
    }
}
