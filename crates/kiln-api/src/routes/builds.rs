//! Build endpoints.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use kiln_core::{BuildId, BuildRecord, BuildStatus, TriggerPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_builds).post(create_build))
        .route("/{id}", get(get_build))
        .route("/{id}/rebuild", post(rebuild))
}

#[derive(Debug, Default, Deserialize)]
pub struct WaitQuery {
    /// Block until the worker is idle and return the finished record.
    #[serde(default)]
    pub wait: bool,
}

/// Response for a build that was queued but not awaited.
#[derive(Debug, Serialize, Deserialize)]
pub struct BuildAccepted {
    pub id: BuildId,
    pub status: BuildStatus,
}

/// Accepts either a bare trigger payload or one wrapped as `{"payload": ...}`.
fn parse_payload(body: &[u8]) -> Result<TriggerPayload, ApiError> {
    let mut value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    if let Some(inner) = value.get_mut("payload").filter(|p| p.is_object()) {
        value = inner.take();
    }

    serde_json::from_value(value).map_err(|e| ApiError::BadRequest(format!("Invalid payload: {}", e)))
}

async fn respond(state: &AppState, id: BuildId, wait: bool) -> Result<Response, ApiError> {
    if !wait {
        let accepted = BuildAccepted {
            id,
            status: BuildStatus::Processing,
        };
        return Ok((StatusCode::ACCEPTED, Json(accepted)).into_response());
    }

    state.dispatcher.wait_idle().await?;
    let record = state.dispatcher.get(&id.to_string()).await?;
    Ok((StatusCode::OK, Json(record)).into_response())
}

async fn create_build(
    State(state): State<AppState>,
    Query(query): Query<WaitQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload = parse_payload(&body)?;
    let id = state.dispatcher.submit_new(payload).await?;
    respond(&state, id, query.wait).await
}

async fn list_builds(State(state): State<AppState>) -> Result<Json<Vec<BuildRecord>>, ApiError> {
    Ok(Json(state.dispatcher.list().await?))
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BuildRecord>, ApiError> {
    Ok(Json(state.dispatcher.get(&id).await?))
}

async fn rebuild(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Result<Response, ApiError> {
    let id = state.dispatcher.resubmit(&id).await?;
    respond(&state, id, query.wait).await
}
