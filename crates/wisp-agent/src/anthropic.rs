use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{
    normalize_payload_error, ChatRequest, Completion, Provider, ProviderError, ToolCall, Usage,
};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::from_status(status, &text));
        }

        let payload: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;

        // A mid-stream disconnect can land an error payload under a 2xx
        // status. Normalise it before anything else reads the response.
        if let Some(err) = normalize_payload_error(&payload) {
            warn!(error = %err, "error payload under success status, normalised");
            return Err(err);
        }

        let api_resp: ApiResponse = serde_json::from_value(payload)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    // System tiers become content blocks; cacheable tiers carry a
    // cache_control marker so the stable prefix is reused across turns.
    let system: Vec<serde_json::Value> = req
        .system
        .iter()
        .map(|block| {
            if block.cacheable {
                serde_json::json!({
                    "type": "text",
                    "text": block.text,
                    "cache_control": {"type": "ephemeral"},
                })
            } else {
                serde_json::json!({"type": "text", "text": block.text})
            }
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "system": system,
        "messages": req.messages,
        "stream": false,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

fn parse_response(resp: ApiResponse) -> Completion {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall { id, name, input });
            }
            ContentBlock::Unknown => {}
        }
    }

    Completion {
        content: text_parts.join(""),
        model: resp.model,
        stop_reason: resp.stop_reason.unwrap_or_default(),
        tool_calls,
        usage: Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
            cache_read_tokens: resp.usage.cache_read_input_tokens.unwrap_or(0),
        },
    }
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_input_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SystemBlock;

    #[test]
    fn cacheable_tiers_carry_cache_control() {
        let req = ChatRequest {
            model: "claude-sonnet-4-6".to_string(),
            system: vec![
                SystemBlock {
                    text: "persona".to_string(),
                    cacheable: true,
                },
                SystemBlock {
                    text: "recall".to_string(),
                    cacheable: false,
                },
            ],
            messages: vec![serde_json::json!({"role": "user", "content": "hi"})],
            max_tokens: 1024,
            tools: Vec::new(),
        };
        let body = build_request_body(&req);
        let system = body["system"].as_array().unwrap();
        assert!(system[0].get("cache_control").is_some());
        assert!(system[1].get("cache_control").is_none());
    }

    #[test]
    fn tool_use_blocks_become_calls() {
        let resp: ApiResponse = serde_json::from_value(serde_json::json!({
            "model": "claude-sonnet-4-6",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5},
            "content": [
                {"type": "text", "text": "checking"},
                {"type": "tool_use", "id": "tu_1", "name": "read_file",
                 "input": {"path": "notes.md"}}
            ]
        }))
        .unwrap();
        let completion = parse_response(resp);
        assert_eq!(completion.content, "checking");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "read_file");
    }
}
