//! Build dispatch for the Kiln build server.
//!
//! Accepted builds are persisted, queued in memory and drained by a single
//! on-demand worker task. The worker exits when the queue runs dry and the
//! dispatcher starts a new one on the next submission.

pub mod dispatcher;
pub mod queue;
pub mod records;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use queue::DispatchQueue;
pub use records::{BlameEntry, BuildRecords};
pub use worker::{Worker, WorkerHandle, WorkerReport, WorkerSlot, WorkerStatus};
