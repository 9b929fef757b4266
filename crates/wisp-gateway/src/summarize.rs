//! Compaction summariser — the dedicated LLM call that folds the oldest
//! slice of a session into one assistant message.

use std::sync::Arc;

use async_trait::async_trait;

use wisp_agent::provider::SystemBlock;
use wisp_agent::{ChatRequest, Provider};
use wisp_sessions::Summarizer;

const SUMMARY_SYSTEM: &str = "Summarize the earlier conversation below for \
the assistant's own future reference. Keep: user preferences, decisions, \
unresolved threads, commitments, and concrete facts. Drop: greetings, tool \
noise, anything superseded later. Write dense prose, max ~300 words.";

pub struct LlmSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn Provider>, model: String, max_tokens: u32) -> Self {
        Self {
            provider,
            model,
            max_tokens,
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String, String> {
        let request = ChatRequest {
            model: self.model.clone(),
            system: vec![SystemBlock {
                text: SUMMARY_SYSTEM.to_string(),
                cacheable: false,
            }],
            messages: vec![serde_json::json!({
                "role": "user",
                "content": transcript,
            })],
            max_tokens: self.max_tokens,
            tools: Vec::new(),
        };
        let cancel = tokio_util::sync::CancellationToken::new();
        self.provider
            .complete(&request, &cancel)
            .await
            .map(|c| c.content)
            .map_err(|e| e.to_string())
    }
}
