//! Worker that drains the dispatch queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kiln_core::{
    BuildExecutor, BuildId, BuildOutcome, BuildRecord, BuildSummary, Error, Notifier,
    NotifyOutcome, Result,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::queue::DispatchQueue;
use crate::records::BuildRecords;

/// Counters for one worker activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Builds that reached the executor.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Queued ids whose record could not be loaded.
    pub skipped: usize,
}

/// What the worker is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Running { build: Option<BuildSummary> },
}

/// Upper bound on one failure notification.
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// The dispatcher's single worker slot, shared with the workers it starts.
///
/// A worker claims queued ids and goes idle only while holding this lock, and
/// producers look for a running worker under it. A producer that enqueues and
/// then finds the worker running can rely on that worker to take the id.
#[derive(Debug, Default)]
pub struct WorkerSlot {
    handle: Mutex<Option<WorkerHandle>>,
}

impl WorkerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct WorkerState {
    running: AtomicBool,
    /// Id taken off the queue and not yet finished.
    claimed: Mutex<Option<BuildId>>,
    current: Mutex<Option<BuildSummary>>,
}

impl WorkerState {
    fn set_claimed(&self, id: Option<BuildId>) {
        *self.claimed.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    fn claimed(&self) -> Option<BuildId> {
        *self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current(&self, build: Option<BuildSummary>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = build;
    }

    fn current(&self) -> Option<BuildSummary> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Leaves the state idle however the worker task ends.
struct IdleOnExit(Arc<WorkerState>);

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        self.0.set_current(None);
        self.0.set_claimed(None);
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Handle to a spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: u64,
    state: Arc<WorkerState>,
    done: watch::Receiver<Option<WorkerReport>>,
}

impl WorkerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Id of the build this worker has dequeued and not finished.
    pub fn claimed_build(&self) -> Option<BuildId> {
        self.state.claimed()
    }

    /// Summary of the build being executed, if any.
    pub fn current_build(&self) -> Option<BuildSummary> {
        self.state.current()
    }

    pub fn status(&self) -> WorkerStatus {
        if self.is_running() {
            WorkerStatus::Running {
                build: self.current_build(),
            }
        } else {
            WorkerStatus::Idle
        }
    }

    /// Wait for the worker to exit and return its counters.
    pub async fn join(&self) -> Result<WorkerReport> {
        let mut done = self.done.clone();
        let report = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Internal(format!("worker {} stopped unexpectedly", self.id)))?;
        Ok((*report).unwrap_or_default())
    }
}

/// Processes queued builds one at a time until the queue is empty.
pub struct Worker {
    id: u64,
    slot: Arc<WorkerSlot>,
    records: Arc<BuildRecords>,
    queue: Arc<DispatchQueue>,
    executor: Arc<dyn BuildExecutor>,
    notifier: Arc<dyn Notifier>,
}

impl Worker {
    pub fn new(
        id: u64,
        slot: Arc<WorkerSlot>,
        records: Arc<BuildRecords>,
        queue: Arc<DispatchQueue>,
        executor: Arc<dyn BuildExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            id,
            slot,
            records,
            queue,
            executor,
            notifier,
        }
    }

    /// Start the worker on the tokio runtime.
    ///
    /// The handle reports running from the moment this returns.
    pub fn spawn(self) -> WorkerHandle {
        let state = Arc::new(WorkerState {
            running: AtomicBool::new(true),
            claimed: Mutex::new(None),
            current: Mutex::new(None),
        });
        let (tx, rx) = watch::channel(None);

        let handle = WorkerHandle {
            id: self.id,
            state: state.clone(),
            done: rx,
        };

        tokio::spawn(async move {
            let _idle = IdleOnExit(state.clone());
            let report = self.run(&state).await;
            // Nobody may be waiting; that's fine.
            let _ = tx.send(Some(report));
        });

        handle
    }

    async fn run(&self, state: &WorkerState) -> WorkerReport {
        info!(worker_id = self.id, executor = self.executor.name(), "Worker started");
        let mut report = WorkerReport::default();

        while let Some(id) = self.claim_next(state) {
            self.process(id, state, &mut report).await;
            state.set_claimed(None);
        }

        info!(
            worker_id = self.id,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Worker finished"
        );
        report
    }

    /// Take the next id, or go idle if there is none.
    fn claim_next(&self, state: &WorkerState) -> Option<BuildId> {
        let _slot = self.slot.lock();
        let next = self.queue.dequeue();
        match next {
            Some(id) => state.set_claimed(Some(id)),
            None => {
                state.running.store(false, Ordering::SeqCst);
                debug!(worker_id = self.id, "Queue empty, going idle");
            }
        }
        next
    }

    async fn process(&self, id: BuildId, state: &WorkerState, report: &mut WorkerReport) {
        let mut record = match self.records.load(id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(build_id = %id, error = %e, "Skipping queued build");
                report.skipped += 1;
                return;
            }
        };

        if record.is_terminal() {
            if let Err(e) = self.records.begin_attempt(&mut record).await {
                error!(build_id = %id, error = %e, "Failed to persist new build attempt");
            }
        }

        state.set_current(Some(record.summary()));
        info!(
            build_id = %id,
            repo = %record.repository.name,
            git_ref = %record.r#ref,
            "Build started"
        );

        let outcome = self.executor.execute(&record).await;
        report.processed += 1;
        match &outcome {
            BuildOutcome::Success => report.succeeded += 1,
            BuildOutcome::Failure(_) => report.failed += 1,
        }

        if let Err(e) = self.records.mark_result(&mut record, &outcome).await {
            error!(build_id = %id, error = %e, "Failed to persist build result");
        }
        info!(build_id = %id, status = %record.status, "Build finished");

        if !outcome.is_success() {
            self.report_failure(&record).await;
        }

        state.set_current(None);
    }

    async fn report_failure(&self, record: &BuildRecord) {
        let id = record.id;
        let notifier = self.notifier.name();
        match tokio::time::timeout(NOTIFY_TIMEOUT, self.notifier.notify(record)).await {
            Ok(Ok(NotifyOutcome::Sent)) => info!(build_id = %id, notifier, "Failure reported"),
            Ok(Ok(NotifyOutcome::NotSent(reason))) => {
                debug!(build_id = %id, notifier, reason = %reason, "Failure not reported")
            }
            Ok(Err(e)) => warn!(build_id = %id, notifier, error = %e, "Failed to report failure"),
            Err(_) => warn!(
                build_id = %id,
                notifier,
                limit_secs = NOTIFY_TIMEOUT.as_secs(),
                "Failure report timed out"
            ),
        }
    }
}
