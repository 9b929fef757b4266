//! POST /chat — synchronous chat through the full pipeline.
//!
//! The handler attaches a oneshot future to the inbound message and waits on
//! it; the orchestrator completes it with the reply or a structured error.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;

use wisp_channels::types::InboundMessage;
use wisp_core::types::Source;

use crate::app::AppState;
use crate::orchestrator;

/// A chat caller is interactive; don't hold the connection forever.
const CHAT_WAIT: Duration = Duration::from_secs(300);

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Session name; each distinct value is its own correspondent.
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub session: String,
}

#[derive(Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub error: String,
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, Json<ApiError>)> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message cannot be empty"));
    }

    let session = format!("http:{}", req.session.as_deref().unwrap_or("default"));
    let (tx, rx) = oneshot::channel();
    let mut message = InboundMessage::new(session.clone(), Source::Http, req.message);
    message.response_tx = Some(tx);

    if let Err(e) = orchestrator::submit(&state, message) {
        warn!(error = %e, "chat submit failed");
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiError {
                code: e.code(),
                error: e.to_string(),
            }),
        ));
    }

    match tokio::time::timeout(CHAT_WAIT, rx).await {
        Ok(Ok(Ok(reply))) => Ok(Json(ChatReply { reply, session })),
        Ok(Ok(Err(detail))) => {
            warn!(detail, "chat pipeline returned an error");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ApiError {
                    code: "LLM_PROVIDER_ERROR",
                    error: "the model call failed; see the daemon log".to_string(),
                }),
            ))
        }
        Ok(Err(_)) => Err(internal("reply channel dropped")),
        Err(_) => Err((
            StatusCode::GATEWAY_TIMEOUT,
            Json(ApiError {
                code: "TIMEOUT",
                error: format!("no reply within {}s", CHAT_WAIT.as_secs()),
            }),
        )),
    }
}

fn bad_request(msg: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            code: "BAD_REQUEST",
            error: msg.to_string(),
        }),
    )
}

fn internal(msg: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            code: "INTERNAL_ERROR",
            error: msg.to_string(),
        }),
    )
}
