use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One tier of the system prompt. Tiers with `cacheable` set form a stable
/// prefix the provider may cache across turns; dynamic tiers come after.
#[derive(Debug, Clone)]
pub struct SystemBlock {
    pub text: String,
    pub cacheable: bool,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
///
/// `input` is whatever the model produced. Adapters that receive arguments
/// as a JSON string (OpenAI dialect) parse them here; unparsable arguments
/// become a `{"_raw": …}` wrapper instead of an adapter error, so the
/// registry can hand the model a readable validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Request to an LLM provider. `messages` are provider-shaped JSON values:
/// `{"role": "...", "content": <string or block array>}`.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: Vec<SystemBlock>,
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
}

/// Response from one provider call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub stop_reason: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl Completion {
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Common interface for all LLM providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Run one completion. Implementations observe `cancel` between network
    /// phases and return `ProviderError::Cancelled` promptly when it fires.
    async fn complete(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, ProviderError>;
}

/// Provider failure classes. Classification decides retry behaviour, so
/// adapters must normalise ambiguous surfaces (a 200 whose payload carries an
/// `overloaded_error`) into the right class before returning.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("provider error ({status}): {message}")]
    Permanent { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the retry layer should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient(_)
                | ProviderError::Overloaded(_)
                | ProviderError::RateLimited { .. }
        )
    }

    /// Classify an HTTP status + body into an error. Shared by both adapters
    /// so the taxonomy cannot drift between them.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => ProviderError::Auth(format!("status {status}: {body}")),
            429 => ProviderError::RateLimited {
                retry_after_ms: None,
            },
            s if s >= 500 => ProviderError::Transient(format!("status {s}: {body}")),
            s => ProviderError::Permanent {
                status: s,
                message: body.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // Connection-level failures are all retryable; anything that made it
        // to a status line is classified by `from_status` instead.
        ProviderError::Transient(e.to_string())
    }
}

/// Inspect a decoded response payload for an error object that arrived under
/// a success status — SDK stream drops surface this way. Returns the
/// normalised class when the payload is such an error.
pub fn normalize_payload_error(payload: &serde_json::Value) -> Option<ProviderError> {
    let err_type = payload
        .get("error")
        .and_then(|e| e.get("type"))
        .and_then(|t| t.as_str())
        .or_else(|| {
            // Some surfaces put the type at the top level.
            payload
                .get("type")
                .and_then(|t| t.as_str())
                .filter(|t| t.ends_with("_error"))
        })?;
    let message = payload
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or(err_type)
        .to_string();
    match err_type {
        "overloaded_error" => Some(ProviderError::Overloaded(message)),
        "api_error" | "internal_server_error" => Some(ProviderError::Transient(message)),
        "rate_limit_error" => Some(ProviderError::RateLimited {
            retry_after_ms: None,
        }),
        "authentication_error" | "permission_error" => Some(ProviderError::Auth(message)),
        t if t.ends_with("_error") => Some(ProviderError::Permanent {
            status: 200,
            message,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ProviderError::from_status(500, "boom"),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, ""),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(401, "no"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(404, "gone"),
            ProviderError::Permanent { status: 404, .. }
        ));
    }

    #[test]
    fn retryable_partition() {
        assert!(ProviderError::Transient("x".into()).is_retryable());
        assert!(ProviderError::Overloaded("x".into()).is_retryable());
        assert!(ProviderError::RateLimited {
            retry_after_ms: Some(100)
        }
        .is_retryable());
        assert!(!ProviderError::Auth("x".into()).is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[test]
    fn overloaded_under_success_status_is_normalised() {
        // A stream drop that surfaces with status 200 but an error payload.
        let payload = serde_json::json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        });
        let err = normalize_payload_error(&payload).unwrap();
        assert!(matches!(err, ProviderError::Overloaded(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn ordinary_payload_is_not_an_error() {
        let payload = serde_json::json!({"content": [{"type": "text", "text": "hi"}]});
        assert!(normalize_payload_error(&payload).is_none());
    }
}
