//! Worker status endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use kiln_core::BuildId;
use kiln_scheduler::WorkerStatus;
use serde::{Deserialize, Serialize};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(worker_status))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerView {
    pub worker: WorkerStatus,
    /// Queued builds, oldest first.
    pub pending: Vec<BuildId>,
}

async fn worker_status(State(state): State<AppState>) -> Json<WorkerView> {
    Json(WorkerView {
        worker: state.dispatcher.worker_status(),
        pending: state.dispatcher.queue().snapshot(),
    })
}
