//! Failed build counts per author.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use kiln_scheduler::BlameEntry;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(blame))
}

async fn blame(State(state): State<AppState>) -> Result<Json<Vec<BlameEntry>>, ApiError> {
    Ok(Json(state.dispatcher.blame().await?))
}
