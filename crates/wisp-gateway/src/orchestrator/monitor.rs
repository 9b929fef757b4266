//! Monitor file — one JSON record, rewritten after every processed message,
//! so an external watchdog can see the daemon is alive and working.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use wisp_core::types::{SenderId, Source};

use crate::app::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub ts: String,
    pub sender: String,
    pub source: String,
    /// First 200 chars of the reply — enough to eyeball liveness without
    /// duplicating the session log.
    pub reply_preview: String,
}

pub fn write_monitor(state: &Arc<AppState>, sender: &SenderId, source: &Source, reply: &str) {
    let record = MonitorRecord {
        ts: chrono::Utc::now().to_rfc3339(),
        sender: sender.to_string(),
        source: source.to_string(),
        reply_preview: reply.chars().take(200).collect(),
    };
    let path = state.config().workspace.monitor_path();
    match serde_json::to_vec_pretty(&record) {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(&path, bytes) {
                warn!(error = %e, path = %path.display(), "monitor write failed");
            }
        }
        Err(e) => warn!(error = %e, "monitor serialization failed"),
    }
}

pub fn read_monitor(state: &Arc<AppState>) -> Option<MonitorRecord> {
    let path = state.config().workspace.monitor_path();
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}
