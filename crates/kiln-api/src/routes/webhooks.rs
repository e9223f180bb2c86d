//! Webhook endpoint for GitHub.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use kiln_core::TriggerPayload;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    process_github_webhook(state, headers, body).await
}

async fn process_github_webhook(
    state: AppState,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok());

    if let Some(secret) = &state.settings.github.webhook_secret {
        if !verify_github_signature(secret, &body, signature) {
            warn!(event = %event_type, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid webhook signature".to_string()));
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let repo_full_name = payload
        .get("repository")
        .and_then(|r| r.get("full_name"))
        .and_then(|n| n.as_str());

    info!(
        event = %event_type,
        repo = ?repo_full_name,
        "Received GitHub webhook"
    );

    match event_type {
        "push" => handle_push_event(&state, &payload).await,
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
            Ok((StatusCode::OK, Json(json!({ "status": "ok" }))))
        }
        _ => {
            info!(event = %event_type, "Unhandled event type");
            Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))))
        }
    }
}

/// Queue a build for the pushed head commit.
async fn handle_push_event(
    state: &AppState,
    payload: &Value,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Some(trigger) = TriggerPayload::from_github_push(payload) else {
        info!("Push without a head commit, nothing to build");
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
    };

    let id = state.dispatcher.submit_new(trigger).await?;
    info!(build_id = %id, "Queued build from push event");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "status": "processing" })),
    ))
}

fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
