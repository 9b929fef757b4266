//! Operator endpoints: notify, cost, monitor, evolve.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use tracing::info;

use wisp_channels::types::InboundMessage;
use wisp_core::types::Source;

use crate::app::AppState;
use crate::http::chat::ApiError;
use crate::orchestrator;

#[derive(Deserialize)]
pub struct NotifyRequest {
    /// The session the note lands in.
    pub sender: String,
    pub message: String,
}

/// POST /notify — fire-and-forget system message. The agent processes it,
/// nothing is delivered anywhere, and the session auto-closes on success.
pub async fn notify_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NotifyRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    if req.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                code: "BAD_REQUEST",
                error: "message cannot be empty".to_string(),
            }),
        ));
    }
    let message = InboundMessage::new(req.sender.as_str(), Source::System, req.message);
    match orchestrator::submit(&state, message) {
        Ok(()) => Ok(Json(serde_json::json!({"queued": true}))),
        Err(e) => Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiError {
                code: e.code(),
                error: e.to_string(),
            }),
        )),
    }
}

/// GET /cost — per-day, per-model spend for the last 30 days.
pub async fn cost_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    match state.costs.summary(30) {
        Ok(rows) => Ok(Json(serde_json::json!({"days": rows}))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                code: "MEMORY_ERROR",
                error: e.to_string(),
            }),
        )),
    }
}

/// GET /monitor — the last processed-message record.
pub async fn monitor_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match orchestrator::monitor::read_monitor(&state) {
        Some(record) => Json(serde_json::to_value(record).unwrap_or_default()),
        None => Json(serde_json::json!({"status": "no messages processed yet"})),
    }
}

#[derive(Deserialize, Default)]
pub struct EvolveRequest {
    #[serde(default)]
    pub instruction: Option<String>,
}

/// POST /evolve — queue a self-maintenance pass: the agent reviews its
/// workspace (persona, skills, notes) and updates it with its tools. Runs as
/// a `system` message, so nothing delivers and the session closes itself.
pub async fn evolve_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EvolveRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let instruction = req.instruction.unwrap_or_else(|| {
        "Review your workspace: tidy persona notes, fold recent learnings \
         into the right files, and retire anything stale."
            .to_string()
    });
    info!("evolve pass queued");
    let message = InboundMessage::new("system:evolve", Source::System, instruction);
    match orchestrator::submit(&state, message) {
        Ok(()) => Ok(Json(serde_json::json!({"queued": true}))),
        Err(e) => Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiError {
                code: e.code(),
                error: e.to_string(),
            }),
        )),
    }
}
