//! In-memory FIFO of builds waiting for the worker.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use kiln_core::BuildId;

/// Unbounded, thread-safe FIFO of pending build ids.
///
/// Shared between intake and the worker through an `Arc`. Every id handed to
/// [`enqueue`](Self::enqueue) is returned by [`dequeue`](Self::dequeue) exactly once.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    pending: Mutex<VecDeque<BuildId>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<BuildId>> {
        // The critical sections never panic halfway through, so a poisoned
        // queue is still a valid queue.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `id` to the back of the queue.
    pub fn enqueue(&self, id: BuildId) {
        self.lock().push_back(id);
    }

    /// Whether anything is waiting. Stale as soon as it returns.
    pub fn has_pending(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Pop the oldest id, or `None` if the queue is empty.
    pub fn dequeue(&self) -> Option<BuildId> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    pub fn contains(&self, id: BuildId) -> bool {
        self.lock().contains(&id)
    }

    /// Pending ids, oldest first.
    pub fn snapshot(&self) -> Vec<BuildId> {
        self.lock().iter().copied().collect()
    }
}
