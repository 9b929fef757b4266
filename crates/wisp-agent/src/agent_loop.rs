//! The agentic loop — one inbound message in, one reply out, with tool
//! dispatch in between.
//!
//! Flow per turn: build context → provider call (retried) → record cost →
//! persist assistant turn → dispatch tool calls in parallel → persist results
//! → repeat. Ends when the model stops calling tools, the turn budget runs
//! out, the cost ceiling is hit, or cancellation fires.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use wisp_core::config::ProviderProfile;
use wisp_core::types::SenderId;
use wisp_memory::cost::CostRecord;
use wisp_memory::{CostStore, MemoryStore};
use wisp_sessions::SessionManager;

use crate::context::ContextBuilder;
use crate::embed::EmbeddingProvider;
use crate::provider::{ChatRequest, Provider, ProviderError, ToolCall};
use crate::retry::{with_retry, RetryPolicy};
use crate::tools::{ToolRegistry, ToolResult};

/// Budgets for one run of the loop.
#[derive(Debug, Clone)]
pub struct LoopPolicy {
    pub max_turns: u32,
    pub cost_ceiling_usd: f64,
    pub call_deadline: Duration,
    pub retry: RetryPolicy,
}

/// Everything the loop needs, shared with the rest of the daemon.
#[derive(Clone)]
pub struct LoopDeps {
    pub provider: Arc<dyn Provider>,
    pub profile: ProviderProfile,
    pub registry: Arc<ToolRegistry>,
    pub sessions: Arc<SessionManager>,
    pub memory: Arc<MemoryStore>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub costs: Arc<CostStore>,
    pub context: Arc<ContextBuilder>,
}

/// How the loop ended. `Fallback` replies are budget/limit notices, kept
/// distinct so callers can log them differently; both deliver as text.
#[derive(Debug)]
pub enum LoopOutcome {
    Reply(String),
    Fallback(String),
}

impl LoopOutcome {
    pub fn text(&self) -> &str {
        match self {
            LoopOutcome::Reply(t) | LoopOutcome::Fallback(t) => t,
        }
    }
}

/// Run the loop for a sender whose user turn is already appended to the
/// session. Returns the final reply text.
#[instrument(skip(deps, policy, cancel), fields(sender = %sender))]
pub async fn run_agent_loop(
    deps: &LoopDeps,
    policy: &LoopPolicy,
    sender: &SenderId,
    cancel: &CancellationToken,
) -> Result<LoopOutcome, ProviderError> {
    let mut session_cost = 0.0f64;

    for turn in 0..policy.max_turns {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let history = deps
            .sessions
            .messages(sender)
            .await
            .map_err(|e| ProviderError::Parse(format!("session read failed: {e}")))?;
        let ctx = deps
            .context
            .build(
                sender,
                &deps.memory,
                deps.embedder.as_deref(),
                &history,
            )
            .await;

        let request = ChatRequest {
            model: deps.profile.model.clone(),
            system: ctx.system,
            messages: ctx.messages,
            max_tokens: deps.profile.max_tokens,
            tools: deps.registry.definitions(),
        };

        let provider = Arc::clone(&deps.provider);
        let deadline = policy.call_deadline;
        let completion = with_retry(&policy.retry, cancel, || {
            let provider = Arc::clone(&provider);
            let request = request.clone();
            let cancel = cancel.clone();
            async move {
                match tokio::time::timeout(deadline, provider.complete(&request, &cancel)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Transient(format!(
                        "provider call exceeded {}s deadline",
                        deadline.as_secs()
                    ))),
                }
            }
        })
        .await?;

        // Cost accounting before anything else can fail.
        let dollars = (completion.usage.input_tokens as f64 / 1e6) * deps.profile.input_price
            + (completion.usage.output_tokens as f64 / 1e6) * deps.profile.output_price;
        session_cost += dollars;
        if let Err(e) = deps.costs.record(&CostRecord {
            ts: chrono::Utc::now().to_rfc3339(),
            model: completion.model.clone(),
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
            cache_tokens: completion.usage.cache_read_tokens,
            dollars,
        }) {
            warn!(error = %e, "cost record failed");
        }

        if session_cost > policy.cost_ceiling_usd {
            warn!(session_cost, ceiling = policy.cost_ceiling_usd, "cost ceiling hit");
            let text = "I had to stop here — this conversation hit its cost ceiling.";
            append_assistant_text(deps, sender, text).await;
            return Ok(LoopOutcome::Fallback(text.to_string()));
        }

        if !completion.wants_tools() {
            append_assistant_text(deps, sender, &completion.content).await;
            info!(
                turn,
                tokens_in = completion.usage.input_tokens,
                tokens_out = completion.usage.output_tokens,
                "loop complete"
            );
            return Ok(LoopOutcome::Reply(completion.content));
        }

        // Persist the assistant turn with its tool_use blocks.
        let mut assistant_blocks = Vec::new();
        if !completion.content.is_empty() {
            assistant_blocks.push(serde_json::json!({"type": "text", "text": completion.content}));
        }
        for call in &completion.tool_calls {
            assistant_blocks.push(serde_json::json!({
                "type": "tool_use", "id": call.id, "name": call.name, "input": call.input,
            }));
            if let Err(e) = deps
                .sessions
                .append_tool_call(sender, &call.id, &call.name, call.input.clone())
                .await
            {
                warn!(error = %e, "tool call audit append failed");
            }
        }
        if let Err(e) = deps
            .sessions
            .append_assistant(sender, serde_json::Value::Array(assistant_blocks))
            .await
        {
            warn!(error = %e, "assistant append failed");
        }

        // Dispatch every tool call for this turn concurrently, joined before
        // the next provider call. Panics and cancellations become error
        // results the model can see — no failure kind escapes the join.
        let results = dispatch_parallel(deps, &completion.tool_calls, cancel).await;

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
        let audit: Vec<(String, String, bool)> = completion
            .tool_calls
            .iter()
            .zip(results.iter())
            .map(|(call, r)| (call.id.clone(), r.content.clone(), r.is_error))
            .collect();
        if let Err(e) = deps
            .sessions
            .append_tool_results(sender, serde_json::Value::Array(result_blocks), &audit)
            .await
        {
            warn!(error = %e, "tool results append failed");
        }
    }

    warn!(max_turns = policy.max_turns, "turn limit reached");
    let text = "I had to stop here — this exchange hit its turn limit.";
    append_assistant_text(deps, sender, text).await;
    Ok(LoopOutcome::Fallback(text.to_string()))
}

async fn append_assistant_text(deps: &LoopDeps, sender: &SenderId, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Err(e) = deps
        .sessions
        .append_assistant(sender, serde_json::json!(text))
        .await
    {
        warn!(error = %e, "assistant append failed");
    }
}

/// Fan the turn's tool calls out as tasks and join all of them. A panicking
/// handler maps to an error result rather than taking the loop down.
async fn dispatch_parallel(
    deps: &LoopDeps,
    calls: &[ToolCall],
    cancel: &CancellationToken,
) -> Vec<ToolResult> {
    let handles: Vec<_> = calls
        .iter()
        .map(|call| {
            let registry = Arc::clone(&deps.registry);
            let call = call.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { registry.dispatch(&call, &cancel).await })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                warn!("tool handler panicked");
                ToolResult::error("tool handler crashed")
            }
            Err(_) => ToolResult::error("tool handler cancelled"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Completion, SystemBlock, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<Vec<Result<Completion, ProviderError>>>,
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
            self.responses.lock().unwrap().remove(0)
        }
    }

    struct NullSummarizer;
    #[async_trait]
    impl wisp_sessions::Summarizer for NullSummarizer {
        async fn summarize(&self, _t: &str) -> Result<String, String> {
            Ok("summary".into())
        }
    }

    fn completion(text: &str, tool_calls: Vec<ToolCall>, tokens: u64) -> Completion {
        Completion {
            content: text.to_string(),
            model: "test-model".into(),
            stop_reason: if tool_calls.is_empty() { "end_turn" } else { "tool_use" }.into(),
            tool_calls,
            usage: Usage {
                input_tokens: tokens,
                output_tokens: tokens,
                cache_read_tokens: 0,
            },
        }
    }

    fn deps_with(
        dir: &std::path::Path,
        responses: Vec<Result<Completion, ProviderError>>,
    ) -> LoopDeps {
        LoopDeps {
            provider: Arc::new(ScriptedProvider {
                responses: Mutex::new(responses),
            }),
            profile: ProviderProfile {
                model: "test-model".into(),
                api: wisp_core::config::ProviderApi::Anthropic,
                base_url: None,
                api_key: None,
                context_window: 100_000,
                input_price: 3.0,
                output_price: 15.0,
                supports_vision: false,
                max_tokens: 1024,
            },
            registry: Arc::new(ToolRegistry::assemble(Vec::new(), &[])),
            sessions: Arc::new(SessionManager::new(
                dir.to_path_buf(),
                dir.join("archive"),
                Arc::new(NullSummarizer),
                0.5,
                Duration::from_millis(100),
            )),
            memory: Arc::new(MemoryStore::open_in_memory().unwrap()),
            embedder: None,
            costs: Arc::new(CostStore::open_in_memory().unwrap()),
            context: Arc::new(ContextBuilder::new(dir.join("ws"))),
        }
    }

    fn policy() -> LoopPolicy {
        LoopPolicy {
            max_turns: 4,
            cost_ceiling_usd: 1.0,
            call_deadline: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                total_deadline: Duration::from_secs(5),
            },
        }
    }

    #[tokio::test]
    async fn plain_reply_ends_after_one_turn() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(dir.path(), vec![Ok(completion("hello!", Vec::new(), 100))]);
        let sender = SenderId::from("u1");
        deps.sessions
            .append_user(&sender, serde_json::json!("hi"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let outcome = run_agent_loop(&deps, &policy(), &sender, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.text(), "hello!");

        // Assistant turn was persisted.
        let messages = deps.sessions.messages(&sender).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let call = ToolCall {
            id: "t1".into(),
            name: "nonexistent".into(),
            input: serde_json::json!({}),
        };
        let deps = deps_with(
            dir.path(),
            vec![
                Ok(completion("", vec![call], 100)),
                Ok(completion("recovered", Vec::new(), 100)),
            ],
        );
        let sender = SenderId::from("u2");
        deps.sessions
            .append_user(&sender, serde_json::json!("go"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let outcome = run_agent_loop(&deps, &policy(), &sender, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.text(), "recovered");

        // The error result is visible in the persisted history.
        let messages = deps.sessions.messages(&sender).await.unwrap();
        let rendered = serde_json::to_string(&messages.iter().map(|m| &m.content).collect::<Vec<_>>()).unwrap();
        assert!(rendered.contains("unknown tool"));
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(
            dir.path(),
            vec![
                Err(ProviderError::Overloaded("busy".into())),
                Ok(completion("fine now", Vec::new(), 100)),
            ],
        );
        let sender = SenderId::from("u3");
        deps.sessions
            .append_user(&sender, serde_json::json!("hi"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let outcome = run_agent_loop(&deps, &policy(), &sender, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.text(), "fine now");
    }

    #[tokio::test]
    async fn auth_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let deps = deps_with(dir.path(), vec![Err(ProviderError::Auth("bad key".into()))]);
        let sender = SenderId::from("u4");
        deps.sessions
            .append_user(&sender, serde_json::json!("hi"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let result = run_agent_loop(&deps, &policy(), &sender, &cancel).await;
        assert!(matches!(result, Err(ProviderError::Auth(_))));
    }

    #[tokio::test]
    async fn cost_ceiling_produces_fallback() {
        let dir = tempfile::tempdir().unwrap();
        // 100M output tokens at $15/M blows any ceiling.
        let deps = deps_with(
            dir.path(),
            vec![Ok(completion("expensive", Vec::new(), 100_000_000))],
        );
        let sender = SenderId::from("u5");
        deps.sessions
            .append_user(&sender, serde_json::json!("hi"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let outcome = run_agent_loop(&deps, &policy(), &sender, &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, LoopOutcome::Fallback(_)));
        assert!(outcome.text().contains("cost ceiling"));
    }

    #[tokio::test]
    async fn turn_limit_produces_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let call = || ToolCall {
            id: "t".into(),
            name: "missing".into(),
            input: serde_json::json!({}),
        };
        let deps = deps_with(
            dir.path(),
            (0..4).map(|_| Ok(completion("", vec![call()], 10))).collect(),
        );
        let sender = SenderId::from("u6");
        deps.sessions
            .append_user(&sender, serde_json::json!("loop forever"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let outcome = run_agent_loop(&deps, &policy(), &sender, &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, LoopOutcome::Fallback(_)));
        assert!(outcome.text().contains("turn limit"));
    }
}
