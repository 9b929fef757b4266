use serde::{Deserialize, Serialize};

/// One message in a session's working context.
///
/// `content` holds provider-shaped content: a plain string for simple turns,
/// or an array of content blocks (text, image, tool_use, tool_result) for
/// multimodal and tool-carrying turns. The session layer never inspects the
/// blocks — it only counts them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: serde_json::Value,
    /// Estimated token weight of this message. Summed into
    /// `SessionState::total_tokens`; removed again on compaction.
    pub tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// The snapshot payload — ground truth on reload. Rewritten atomically
/// (temp file + rename) after every critical mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub sender: String,
    pub messages: Vec<StoredMessage>,
    pub total_tokens: u64,
    pub compaction_count: u32,
    pub pending_warning: bool,
    pub created_at: String,
}

impl SessionState {
    pub fn new(sender: &str) -> Self {
        Self {
            sender: sender.to_string(),
            messages: Vec::new(),
            total_tokens: 0,
            compaction_count: 0,
            pending_warning: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One line in the append-only audit log. Never mutated after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn now(payload: EventPayload) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    User {
        content: serde_json::Value,
    },
    Assistant {
        content: serde_json::Value,
    },
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        content: String,
        is_error: bool,
    },
    Compaction {
        replaced_messages: usize,
        summary_tokens: u64,
    },
    Close,
}

/// Token weight estimate for arbitrary content: serialized length over four.
///
/// Provider-reported usage is recorded separately in the cost database; this
/// estimator only has to move monotonically with added and removed content so
/// the compaction thresholds behave.
pub fn estimate_tokens(content: &serde_json::Value) -> u64 {
    let len = match content {
        serde_json::Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    };
    (len as u64 / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_content() {
        let short = estimate_tokens(&serde_json::json!("hi"));
        let long = estimate_tokens(&serde_json::json!("a".repeat(400)));
        assert!(long > short);
        assert_eq!(long, 100);
    }

    #[test]
    fn event_lines_tag_their_type() {
        let ev = Event::now(EventPayload::Close);
        let line = serde_json::to_string(&ev).unwrap();
        assert!(line.contains("\"type\":\"close\""));
        let back: Event = serde_json::from_str(&line).unwrap();
        assert!(matches!(back.payload, EventPayload::Close));
    }
}
