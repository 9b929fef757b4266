//! OpenAI-compatible chat adapter. Kept in lockstep with the Anthropic
//! adapter: identical status classification (shared `from_status`), identical
//! payload-error normalisation, and the same malformed-argument fallback —
//! arguments that fail to parse become a `{"_raw": …}` value the registry
//! rejects with a readable error instead of an adapter crash.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{
    normalize_payload_error, ChatRequest, Completion, Provider, ProviderError, ToolCall, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %req.model, "sending request to OpenAI-compatible endpoint");

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            r = send => r?,
        };

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            t = resp.text() => t?,
        };

        if status < 200 || status >= 300 {
            warn!(status, body = %text, "OpenAI API error");
            return Err(ProviderError::from_status(status, &text));
        }

        let payload: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;

        if let Some(err) = normalize_payload_error(&payload) {
            warn!(error = %err, "error payload under success status, normalised");
            return Err(err);
        }

        let api_resp: ApiResponse = serde_json::from_value(payload)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_response(api_resp)
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    // OpenAI has no cache tiers — the system blocks concatenate into one
    // system message at the head of the list.
    let system_text = req
        .system
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages: Vec<serde_json::Value> = Vec::with_capacity(req.messages.len() + 1);
    if !system_text.is_empty() {
        messages.push(serde_json::json!({"role": "system", "content": system_text}));
    }
    for msg in &req.messages {
        messages.extend(translate_message(msg));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "messages": messages,
        "stream": false,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

/// Translate one canonical (Anthropic-shaped) message into the OpenAI
/// dialect. Tool-use assistant turns become `tool_calls`; a tool-result user
/// turn fans out into one `role: "tool"` message per result block.
fn translate_message(msg: &serde_json::Value) -> Vec<serde_json::Value> {
    let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
    let content = msg.get("content").cloned().unwrap_or_default();

    let blocks = match content.as_array() {
        Some(blocks) => blocks.clone(),
        None => return vec![serde_json::json!({"role": role, "content": content})],
    };

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<serde_json::Value> = Vec::new();
    let mut tool_results: Vec<serde_json::Value> = Vec::new();

    for block in &blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text_parts.push(t.to_string());
                }
            }
            Some("tool_use") => {
                tool_calls.push(serde_json::json!({
                    "id": block.get("id"),
                    "type": "function",
                    "function": {
                        "name": block.get("name"),
                        "arguments": block.get("input").map(|i| i.to_string()),
                    }
                }));
            }
            Some("tool_result") => {
                tool_results.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": block.get("tool_use_id"),
                    "content": block.get("content"),
                }));
            }
            _ => {}
        }
    }

    if !tool_results.is_empty() {
        return tool_results;
    }

    let mut out = serde_json::json!({
        "role": role,
        "content": text_parts.join(""),
    });
    if !tool_calls.is_empty() {
        out["tool_calls"] = serde_json::Value::Array(tool_calls);
    }
    vec![out]
}

fn parse_response(resp: ApiResponse) -> Result<Completion, ProviderError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("response contained no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            // Malformed arguments fall back to a wrapper value — parity with
            // the Anthropic path where input is already structured JSON.
            let input = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|_| serde_json::json!({"_raw": tc.function.arguments}));
            ToolCall {
                id: tc.id,
                name: tc.function.name,
                input,
            }
        })
        .collect();

    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
        model: resp.model,
        stop_reason: choice.finish_reason.unwrap_or_default(),
        tool_calls,
        usage: Usage {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
            cache_read_tokens: 0,
        },
    })
}

// OpenAI API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<Choice>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_arguments_fall_back_instead_of_failing() {
        let resp: ApiResponse = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 5, "completion_tokens": 3},
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "exec", "arguments": "{not valid json"}
                    }]
                }
            }]
        }))
        .unwrap();
        let completion = parse_response(resp).unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(
            completion.tool_calls[0].input["_raw"],
            serde_json::json!("{not valid json")
        );
    }

    #[test]
    fn tool_result_blocks_fan_out_to_tool_role_messages() {
        let msg = serde_json::json!({
            "role": "user",
            "content": [
                {"type": "tool_result", "tool_use_id": "tu_1", "content": "done", "is_error": false},
                {"type": "tool_result", "tool_use_id": "tu_2", "content": "also done", "is_error": false}
            ]
        });
        let out = translate_message(&msg);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["role"], "tool");
        assert_eq!(out[0]["tool_call_id"], "tu_1");
        assert_eq!(out[1]["tool_call_id"], "tu_2");
    }

    #[test]
    fn empty_choices_is_a_parse_error() {
        let resp: ApiResponse = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 0, "completion_tokens": 0},
            "choices": []
        }))
        .unwrap();
        assert!(matches!(
            parse_response(resp),
            Err(ProviderError::Parse(_))
        ));
    }
}
