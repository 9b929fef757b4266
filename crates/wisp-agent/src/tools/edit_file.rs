//! Tool: edit_file — exact string replacement inside an allowed file.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::paths::check_path;
use super::{Danger, Tool, ToolResult};

pub struct EditFileTool {
    allow_roots: Vec<PathBuf>,
}

impl EditFileTool {
    pub fn new(allow_roots: Vec<PathBuf>) -> Self {
        Self { allow_roots }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. `old` must occur exactly once \
         unless `replace_all` is set."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute path of the file."},
                "old": {"type": "string", "description": "Exact text to replace."},
                "new": {"type": "string", "description": "Replacement text."},
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default: false)."
                }
            },
            "required": ["path", "old", "new"]
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
        let old = match input.get("old").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s,
            _ => return ToolResult::error("missing or empty parameter: old"),
        };
        let new = match input.get("new").and_then(|v| v.as_str()) {
            Some(s) => s,
            None => return ToolResult::error("missing required parameter: new"),
        };
        let replace_all = input
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let path = match check_path(raw, &self.allow_roots) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to read '{raw}': {e}")),
        };

        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            return ToolResult::error("`old` text not found in file");
        }
        if occurrences > 1 && !replace_all {
            return ToolResult::error(format!(
                "`old` text occurs {occurrences} times; pass replace_all or a more specific string"
            ));
        }

        let updated = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };

        match tokio::fs::write(&path, updated).await {
            Ok(()) => ToolResult::success(format!(
                "replaced {} occurrence(s) in {}",
                if replace_all { occurrences } else { 1 },
                path.display()
            )),
            Err(e) => ToolResult::error(format!("failed to write '{raw}': {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unique_replacement_applies() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let file = root.join("f.txt");
        std::fs::write(&file, "alpha beta gamma").unwrap();
        let tool = EditFileTool::new(vec![root]);
        let cancel = CancellationToken::new();
        let result = tool
            .execute(
                serde_json::json!({
                    "path": file.to_str().unwrap(),
                    "old": "beta", "new": "BETA"
                }),
                &cancel,
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "alpha BETA gamma");
    }

    #[tokio::test]
    async fn ambiguous_replacement_requires_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let file = root.join("f.txt");
        std::fs::write(&file, "x x x").unwrap();
        let tool = EditFileTool::new(vec![root]);
        let cancel = CancellationToken::new();

        let ambiguous = tool
            .execute(
                serde_json::json!({"path": file.to_str().unwrap(), "old": "x", "new": "y"}),
                &cancel,
            )
            .await;
        assert!(ambiguous.is_error);

        let all = tool
            .execute(
                serde_json::json!({
                    "path": file.to_str().unwrap(),
                    "old": "x", "new": "y", "replace_all": true
                }),
                &cancel,
            )
            .await;
        assert!(!all.is_error);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "y y y");
    }
}
