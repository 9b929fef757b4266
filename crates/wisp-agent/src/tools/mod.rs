//! Tool system: the bounded set of capabilities the LLM may invoke.
//!
//! Registration is explicit — `build_registry` assembles descriptors from the
//! config enable-list, and dispatch is a single map lookup keyed by the name
//! the model emitted. There is no reflective call path and no
//! string-to-function reconstruction anywhere.

pub mod build;
pub mod commitment;
pub mod edit_file;
pub mod exec;
pub mod memory_tools;
pub mod net;
pub mod paths;
pub mod read_file;
pub mod spawn;
pub mod web_fetch;
pub mod write_file;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{ToolCall, ToolDefinition};

/// Danger classification of a tool — surfaced in listings and logs so an
/// operator can audit what the enable-list exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Danger {
    Critical,
    High,
    Medium,
    Low,
}

/// Result of executing a tool. Errors are data, not exceptions — the model
/// sees them and reacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name for this tool (e.g. "read_file").
    fn name(&self) -> &str;
    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Danger classification.
    fn danger(&self) -> Danger;
    /// Execute the tool. Handlers validate every resource-naming parameter
    /// themselves before touching the resource, and observe `cancel`.
    async fn execute(&self, input: serde_json::Value, cancel: &CancellationToken) -> ToolResult;
}

/// Ordered, immutable-after-startup tool registry.
pub struct ToolRegistry {
    order: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Assemble a registry from the given tools, keeping only names on the
    /// enable-list (in registration order). Duplicate names are a programmer
    /// error and panic at startup rather than shadowing silently.
    pub fn assemble(tools: Vec<Arc<dyn Tool>>, enabled: &[String]) -> Self {
        let mut order = Vec::new();
        let mut index = HashMap::new();
        for tool in tools {
            if !enabled.iter().any(|e| e == tool.name()) {
                debug!(tool = tool.name(), "tool not on enable-list, skipping");
                continue;
            }
            let name = tool.name().to_string();
            if index.contains_key(&name) {
                panic!("duplicate tool registration: {name}");
            }
            index.insert(name, order.len());
            order.push(tool);
        }
        Self { order, index }
    }

    /// Compute the registry a sub-agent receives: this registry minus the
    /// deny-list. `sessions_spawn` is always denied — no recursive spawning —
    /// enforced here, at assembly, not inside the handler.
    pub fn subagent_view(&self, deny: &[String]) -> Self {
        let mut order = Vec::new();
        let mut index = HashMap::new();
        for tool in &self.order {
            let name = tool.name();
            if name == spawn::SPAWN_TOOL_NAME || deny.iter().any(|d| d == name) {
                continue;
            }
            index.insert(name.to_string(), order.len());
            order.push(Arc::clone(tool));
        }
        Self { order, index }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.order[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// API-level definitions for the provider request, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Dispatch one tool call. Unknown names and non-object arguments become
    /// error results the model can read — never a panic, never a crash.
    pub async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        let tool = match self.get(&call.name) {
            Some(t) => t,
            None => {
                warn!(tool = %call.name, "unknown tool requested");
                return ToolResult::error(format!(
                    "unknown tool '{}'. Available tools: {}",
                    call.name,
                    self.names().join(", ")
                ));
            }
        };

        if !call.input.is_object() {
            return ToolResult::error(format!(
                "arguments for '{}' did not parse as a JSON object",
                call.name
            ));
        }

        debug!(tool = %call.name, danger = ?tool.danger(), "dispatching tool");
        tool.execute(call.input.clone(), cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo input back"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        fn danger(&self) -> Danger {
            Danger::Low
        }
        async fn execute(&self, input: serde_json::Value, _cancel: &CancellationToken) -> ToolResult {
            ToolResult::success(input["text"].as_str().unwrap_or_default().to_string())
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::assemble(vec![Arc::new(EchoTool)], &["echo".to_string()])
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result_listing_available() {
        let reg = registry();
        let cancel = CancellationToken::new();
        let result = reg
            .dispatch(
                &ToolCall {
                    id: "1".into(),
                    name: "launch_missiles".into(),
                    input: serde_json::json!({}),
                },
                &cancel,
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("echo"));
    }

    #[tokio::test]
    async fn non_object_arguments_are_a_parse_error_result() {
        let reg = registry();
        let cancel = CancellationToken::new();
        let result = reg
            .dispatch(
                &ToolCall {
                    id: "1".into(),
                    name: "echo".into(),
                    input: serde_json::json!("not an object"),
                },
                &cancel,
            )
            .await;
        assert!(result.is_error);
    }

    #[test]
    fn enable_list_filters_assembly() {
        let reg = ToolRegistry::assemble(vec![Arc::new(EchoTool)], &[]);
        assert!(reg.is_empty());
    }
}
