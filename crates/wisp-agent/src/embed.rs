//! Embedding provider interface + OpenAI-compatible client.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::provider::ProviderError;

/// Computes embedding vectors for a batch of texts.
///
/// Implementations must return exactly one vector per input text, in input
/// order — the caller pairs them positionally and treats a count mismatch as
/// a hard error, never a truncation.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String, base_url: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/v1/embeddings", self.base_url);
        debug!(count = texts.len(), model = %self.model, "embedding batch");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({"model": self.model, "input": texts}))
            .send()
            .await?;

        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if status < 200 || status >= 300 {
            return Err(ProviderError::from_status(status, &text));
        }

        let api: ApiResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let mut rows = api.data;
        // The API reports an index per row; positional pairing needs them sorted.
        rows.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = rows.into_iter().map(|d| d.embedding).collect();

        if vectors.len() != texts.len() {
            return Err(ProviderError::Parse(format!(
                "embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}
