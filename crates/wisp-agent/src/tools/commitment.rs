//! Tool: commitment_update — change the status of an open commitment.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use wisp_memory::types::CommitmentStatus;
use wisp_memory::MemoryStore;

use super::{Danger, Tool, ToolResult};

pub struct CommitmentUpdateTool {
    store: Arc<MemoryStore>,
}

impl CommitmentUpdateTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CommitmentUpdateTool {
    fn name(&self) -> &str {
        "commitment_update"
    }

    fn description(&self) -> &str {
        "Mark a commitment as done, expired, or cancelled (or reopen it). \
         Use the ids shown in the open-commitments context block."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "status": {
                    "type": "string",
                    "enum": ["open", "done", "expired", "cancelled"]
                }
            },
            "required": ["id", "status"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::Low
    }

    async fn execute(&self, input: serde_json::Value, _cancel: &CancellationToken) -> ToolResult {
        let id = match input.get("id").and_then(|v| v.as_i64()) {
            Some(id) => id,
            None => return ToolResult::error("missing required parameter: id"),
        };
        let status: CommitmentStatus = match input
            .get("status")
            .and_then(|v| v.as_str())
            .map(str::parse)
        {
            Some(Ok(s)) => s,
            Some(Err(e)) => return ToolResult::error(e.to_string()),
            None => return ToolResult::error("missing required parameter: status"),
        };

        match self.store.update_commitment(id, status) {
            Ok(()) => ToolResult::success(format!("commitment #{id} is now {}", status.as_str())),
            Err(e) => ToolResult::error(format!("update failed: {e}")),
        }
    }
}
