//! Tool: write_file — create or overwrite a file inside the allow-roots.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::paths::check_path;
use super::{Danger, Tool, ToolResult};

pub struct WriteFileTool {
    allow_roots: Vec<PathBuf>,
}

impl WriteFileTool {
    pub fn new(allow_roots: Vec<PathBuf>) -> Self {
        Self { allow_roots }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the workspace, creating parent \
         directories as needed. Overwrites existing content."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path of the file to write."
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write."
                }
            },
            "required": ["path", "content"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::High
    }

    async fn execute(&self, input: serde_json::Value, _cancel: &CancellationToken) -> ToolResult {
        let raw = match input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("missing required parameter: path"),
        };
        let content = match input.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolResult::error("missing required parameter: content"),
        };
        let path = match check_path(raw, &self.allow_roots) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("cannot create '{}': {e}", parent.display()));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => ToolResult::success(format!(
                "wrote {} bytes to {}",
                content.len(),
                path.display()
            )),
            Err(e) => ToolResult::error(format!("failed to write '{raw}': {e}")),
        }
    }
}
