//! Tool: sessions_spawn — run a bounded, ephemeral sub-agent on a task.
//!
//! The sub-agent's tool set is the parent registry minus the configured
//! deny-list; `sessions_spawn` itself is always removed, so a sub-agent can
//! never spawn another. That filtering happens in `ToolRegistry::subagent_view`
//! at assembly time — this handler only receives the already-reduced view.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, Provider, SystemBlock};

use super::{Danger, Tool, ToolRegistry, ToolResult};

pub const SPAWN_TOOL_NAME: &str = "sessions_spawn";

/// Sub-agents get a short leash — they are for delegated lookups, not for
/// open-ended work.
const SUBAGENT_MAX_TURNS: usize = 8;
const SUBAGENT_SYSTEM: &str = "You are a focused sub-agent. Complete the given \
task using the available tools, then reply with a concise result. Do not ask \
questions — make reasonable assumptions and note them.";

pub struct SpawnTool {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
    subagent_tools: Arc<ToolRegistry>,
}

impl SpawnTool {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: String,
        max_tokens: u32,
        subagent_tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            provider,
            model,
            max_tokens,
            subagent_tools,
        }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        SPAWN_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a sub-agent with its own tool \
         access. Returns the sub-agent's final answer."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Complete description of the task to delegate."
                }
            },
            "required": ["task"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::High
    }

    async fn execute(&self, input: serde_json::Value, cancel: &CancellationToken) -> ToolResult {
        let task = match input.get("task").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => return ToolResult::error("missing required parameter: task"),
        };

        let mut messages = vec![serde_json::json!({"role": "user", "content": task})];

        for turn in 0..SUBAGENT_MAX_TURNS {
            if cancel.is_cancelled() {
                return ToolResult::error("sub-agent cancelled");
            }

            let request = ChatRequest {
                model: self.model.clone(),
                system: vec![SystemBlock {
                    text: SUBAGENT_SYSTEM.to_string(),
                    cacheable: false,
                }],
                messages: messages.clone(),
                max_tokens: self.max_tokens,
                tools: self.subagent_tools.definitions(),
            };

            let completion = match self.provider.complete(&request, cancel).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, turn, "sub-agent provider call failed");
                    return ToolResult::error(format!("sub-agent failed: {e}"));
                }
            };

            if !completion.wants_tools() {
                debug!(turn, "sub-agent finished");
                return ToolResult::success(completion.content);
            }

            // Mirror the main loop's message shape: assistant tool_use blocks,
            // then one user message carrying all results.
            let mut assistant_blocks = Vec::new();
            if !completion.content.is_empty() {
                assistant_blocks
                    .push(serde_json::json!({"type": "text", "text": completion.content}));
            }
            for call in &completion.tool_calls {
                assistant_blocks.push(serde_json::json!({
                    "type": "tool_use", "id": call.id, "name": call.name, "input": call.input,
                }));
            }
            messages.push(serde_json::json!({"role": "assistant", "content": assistant_blocks}));

            let results = join_all(
                completion
                    .tool_calls
                    .iter()
                    .map(|call| self.subagent_tools.dispatch(call, cancel)),
            )
            .await;

            let result_blocks: Vec<serde_json::Value> = completion
                .tool_calls
                .iter()
                .zip(results.iter())
                .map(|(call, result)| {
                    serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": call.id,
                        "content": result.content,
                        "is_error": result.is_error,
                    })
                })
                .collect();
            messages.push(serde_json::json!({"role": "user", "content": result_blocks}));
        }

        ToolResult::error(format!(
            "sub-agent hit the {SUBAGENT_MAX_TURNS}-turn limit without finishing"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Completion, ProviderError, ToolCall, Usage};

    struct ScriptedProvider {
        responses: std::sync::Mutex<Vec<Completion>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn complete(
            &self,
            _req: &ChatRequest,
            _cancel: &CancellationToken,
        ) -> Result<Completion, ProviderError> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
    }

    fn text_completion(text: &str) -> Completion {
        Completion {
            content: text.to_string(),
            model: "m".into(),
            stop_reason: "end_turn".into(),
            tool_calls: Vec::new(),
            usage: Usage::default(),
        }
    }

    #[tokio::test]
    async fn subagent_view_excludes_spawn_itself() {
        let provider = Arc::new(ScriptedProvider {
            responses: std::sync::Mutex::new(vec![text_completion("done")]),
        });
        let empty = Arc::new(ToolRegistry::assemble(Vec::new(), &[]));
        let spawn: Arc<dyn Tool> = Arc::new(SpawnTool::new(
            Arc::clone(&provider) as Arc<dyn Provider>,
            "m".into(),
            512,
            empty,
        ));
        let registry = ToolRegistry::assemble(vec![spawn], &[SPAWN_TOOL_NAME.to_string()]);
        assert!(registry.get(SPAWN_TOOL_NAME).is_some());
        let sub = registry.subagent_view(&[]);
        assert!(sub.get(SPAWN_TOOL_NAME).is_none());
    }

    #[tokio::test]
    async fn subagent_runs_tools_then_returns_text() {
        let tool_turn = Completion {
            content: String::new(),
            model: "m".into(),
            stop_reason: "tool_use".into(),
            tool_calls: vec![ToolCall {
                id: "t1".into(),
                name: "missing_tool".into(),
                input: serde_json::json!({}),
            }],
            usage: Usage::default(),
        };
        let provider = Arc::new(ScriptedProvider {
            responses: std::sync::Mutex::new(vec![tool_turn, text_completion("all done")]),
        });
        let spawn = SpawnTool::new(
            provider as Arc<dyn Provider>,
            "m".into(),
            512,
            Arc::new(ToolRegistry::assemble(Vec::new(), &[])),
        );
        let cancel = CancellationToken::new();
        let result = spawn
            .execute(serde_json::json!({"task": "look something up"}), &cancel)
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "all done");
    }
}
