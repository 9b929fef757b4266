//! Tool: read_file — read a file from inside the allow-roots.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::paths::check_path;
use super::{Danger, Tool, ToolResult};

/// Maximum characters returned to avoid flooding the context window.
const MAX_OUTPUT_CHARS: usize = 30_000;

pub struct ReadFileTool {
    allow_roots: Vec<PathBuf>,
}

impl ReadFileTool {
    pub fn new(allow_roots: Vec<PathBuf>) -> Self {
        Self { allow_roots }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file inside the workspace. Optionally limit \
         to a line range with `offset` (1-based first line) and `limit`."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path to the file."
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start reading from (optional)."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (optional)."
                }
            },
            "required": ["path"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::Medium
    }

    async fn execute(&self, input: serde_json::Value, _cancel: &CancellationToken) -> ToolResult {
        let raw = match input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("missing required parameter: path"),
        };
        let path = match check_path(raw, &self.allow_roots) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to read '{raw}': {e}")),
        };

        let offset = input
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|v| v.saturating_sub(1) as usize);
        let limit = input.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);

        let result = if offset.is_some() || limit.is_some() {
            let start = offset.unwrap_or(0);
            let lines: Vec<&str> = content.lines().skip(start).collect();
            let lines = if let Some(n) = limit {
                &lines[..n.min(lines.len())]
            } else {
                &lines[..]
            };
            lines.join("\n")
        } else {
            content
        };

        let result = if result.chars().count() > MAX_OUTPUT_CHARS {
            let cut: String = result.chars().take(MAX_OUTPUT_CHARS).collect();
            format!("{cut}\n\n[output truncated at {MAX_OUTPUT_CHARS} characters]")
        } else {
            result
        };

        ToolResult::success(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_inside_root_rejects_outside() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ws");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("notes.txt"), "line1\nline2\nline3").unwrap();
        std::fs::write(dir.path().join("outside.txt"), "secret").unwrap();

        let tool = ReadFileTool::new(vec![root.clone()]);
        let cancel = CancellationToken::new();

        let ok = tool
            .execute(
                serde_json::json!({"path": root.join("notes.txt").to_str().unwrap()}),
                &cancel,
            )
            .await;
        assert!(!ok.is_error);
        assert!(ok.content.contains("line2"));

        let denied = tool
            .execute(
                serde_json::json!({"path": dir.path().join("outside.txt").to_str().unwrap()}),
                &cancel,
            )
            .await;
        assert!(denied.is_error);
    }

    #[tokio::test]
    async fn line_range_selection() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::write(root.join("f.txt"), "a\nb\nc\nd").unwrap();
        let tool = ReadFileTool::new(vec![root.clone()]);
        let cancel = CancellationToken::new();
        let result = tool
            .execute(
                serde_json::json!({
                    "path": root.join("f.txt").to_str().unwrap(),
                    "offset": 2, "limit": 2
                }),
                &cancel,
            )
            .await;
        assert_eq!(result.content, "b\nc");
    }
}
