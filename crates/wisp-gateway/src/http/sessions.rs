//! Session admin surface: list, history, reset.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use wisp_core::types::SenderId;

use crate::app::AppState;
use crate::http::chat::ApiError;
use crate::orchestrator;

#[derive(Serialize)]
pub struct SessionSummary {
    pub sender: String,
    pub total_tokens: u64,
    pub compaction_count: u32,
    pub warning_pending: bool,
}

pub async fn list_handler(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    let mut out = Vec::new();
    for sender in state.sessions.active_senders() {
        if let Ok((total_tokens, compaction_count, warning_pending)) =
            state.sessions.totals(&sender).await
        {
            out.push(SessionSummary {
                sender: sender.to_string(),
                total_tokens,
                compaction_count,
                warning_pending,
            });
        }
    }
    out.sort_by(|a, b| a.sender.cmp(&b.sender));
    Json(out)
}

#[derive(Serialize)]
pub struct HistoryReply {
    pub sender: String,
    pub messages: Vec<serde_json::Value>,
}

pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<HistoryReply>, (StatusCode, Json<ApiError>)> {
    let sender = SenderId::from(id.as_str());
    match state.sessions.messages(&sender).await {
        Ok(messages) => Ok(Json(HistoryReply {
            sender: id,
            messages: messages
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "role": match m.role {
                            wisp_sessions::types::Role::User => "user",
                            wisp_sessions::types::Role::Assistant => "assistant",
                        },
                        "content": m.content,
                        "tokens": m.tokens,
                    })
                })
                .collect(),
        })),
        Err(e) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError {
                code: "SESSION_ERROR",
                error: e.to_string(),
            }),
        )),
    }
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub sender: String,
}

pub async fn reset_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let sender = SenderId::from(req.sender.as_str());
    match orchestrator::close_session(&state, &sender).await {
        Ok(()) => Ok(Json(serde_json::json!({"closed": req.sender}))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                code: e.code(),
                error: e.to_string(),
            }),
        )),
    }
}
