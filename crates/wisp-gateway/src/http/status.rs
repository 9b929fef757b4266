//! GET /status — unauthenticated health probe.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct StatusReply {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub active_sessions: usize,
    pub channels: Vec<String>,
}

pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusReply> {
    Json(StatusReply {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        active_sessions: state.sessions.active_senders().len(),
        channels: state.channels.iter().map(|c| c.key().clone()).collect(),
    })
}
