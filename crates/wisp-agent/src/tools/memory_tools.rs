//! Memory tools: recall over the indexed workspace plus structured fact
//! read/write. Fact values feed the model's context and nothing else.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use wisp_memory::MemoryStore;

use crate::embed::EmbeddingProvider;

use super::{Danger, Tool, ToolResult};

const RECALL_DEFAULT_K: usize = 6;

pub struct MemoryRecallTool {
    store: Arc<MemoryStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl MemoryRecallTool {
    pub fn new(store: Arc<MemoryStore>, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Tool for MemoryRecallTool {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Search long-term memory (indexed workspace files) for passages \
         relevant to a query. Combines keyword and semantic search."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for."},
                "k": {"type": "integer", "description": "Maximum passages to return (default 6)."}
            },
            "required": ["query"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::Low
    }

    async fn execute(&self, input: serde_json::Value, _cancel: &CancellationToken) -> ToolResult {
        let query = match input.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.to_string(),
            _ => return ToolResult::error("missing required parameter: query"),
        };
        let k = input
            .get("k")
            .and_then(|v| v.as_u64())
            .map(|v| (v as usize).clamp(1, 20))
            .unwrap_or(RECALL_DEFAULT_K);

        // Embedding failure degrades to full-text-only recall.
        let query_vec = match &self.embedder {
            Some(embedder) => match embedder.embed(&[query.clone()]).await {
                Ok(mut vecs) if vecs.len() == 1 => Some(vecs.remove(0)),
                Ok(vecs) => {
                    warn!(got = vecs.len(), "embedding count mismatch for recall query");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "query embedding failed, falling back to full-text");
                    None
                }
            },
            None => None,
        };

        match self.store.recall(&query, query_vec.as_deref(), k) {
            Ok(block) => ToolResult::success(block),
            Err(e) => ToolResult::error(format!("recall failed: {e}")),
        }
    }
}

pub struct MemoryWriteTool {
    store: Arc<MemoryStore>,
    session: String,
}

impl MemoryWriteTool {
    pub fn new(store: Arc<MemoryStore>, session: impl Into<String>) -> Self {
        Self {
            store,
            session: session.into(),
        }
    }
}

#[async_trait]
impl Tool for MemoryWriteTool {
    fn name(&self) -> &str {
        "memory_write"
    }

    fn description(&self) -> &str {
        "Store a structured fact: entity, attribute, value, confidence 0..1. \
         Supersedes any previous value for the same entity and attribute."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity": {"type": "string"},
                "attribute": {"type": "string"},
                "value": {"type": "string"},
                "confidence": {"type": "number", "description": "0.0 to 1.0 (default 0.8)."}
            },
            "required": ["entity", "attribute", "value"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::Low
    }

    async fn execute(&self, input: serde_json::Value, _cancel: &CancellationToken) -> ToolResult {
        let entity = match input.get("entity").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s,
            _ => return ToolResult::error("missing required parameter: entity"),
        };
        let attribute = match input.get("attribute").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s,
            _ => return ToolResult::error("missing required parameter: attribute"),
        };
        let value = match input.get("value").and_then(|v| v.as_str()) {
            Some(s) => s,
            None => return ToolResult::error("missing required parameter: value"),
        };
        let confidence = input
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.8)
            .clamp(0.0, 1.0);

        match self
            .store
            .write_fact(entity, attribute, value, confidence, Some(&self.session))
        {
            Ok(id) => ToolResult::success(format!("stored fact #{id}: {entity}.{attribute}")),
            Err(e) => ToolResult::error(format!("memory write failed: {e}")),
        }
    }
}

pub struct MemoryForgetTool {
    store: Arc<MemoryStore>,
}

impl MemoryForgetTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryForgetTool {
    fn name(&self) -> &str {
        "memory_forget"
    }

    fn description(&self) -> &str {
        "Invalidate a stored fact by its id (as returned by lookup_facts)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "fact_id": {"type": "integer"}
            },
            "required": ["fact_id"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::Low
    }

    async fn execute(&self, input: serde_json::Value, _cancel: &CancellationToken) -> ToolResult {
        let id = match input.get("fact_id").and_then(|v| v.as_i64()) {
            Some(id) => id,
            None => return ToolResult::error("missing required parameter: fact_id"),
        };
        match self.store.forget_fact(id) {
            Ok(()) => ToolResult::success(format!("fact #{id} forgotten")),
            Err(e) => ToolResult::error(format!("forget failed: {e}")),
        }
    }
}

pub struct LookupFactsTool {
    store: Arc<MemoryStore>,
}

impl LookupFactsTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for LookupFactsTool {
    fn name(&self) -> &str {
        "lookup_facts"
    }

    fn description(&self) -> &str {
        "Look up stored facts about an entity, optionally narrowed to one \
         attribute. Entity names resolve through known aliases."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity": {"type": "string"},
                "attribute": {"type": "string"}
            },
            "required": ["entity"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::Low
    }

    async fn execute(&self, input: serde_json::Value, _cancel: &CancellationToken) -> ToolResult {
        let entity = match input.get("entity").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s,
            _ => return ToolResult::error("missing required parameter: entity"),
        };
        let attribute = input.get("attribute").and_then(|v| v.as_str());

        match self.store.lookup_facts(entity, attribute) {
            Ok(facts) if facts.is_empty() => {
                ToolResult::success(format!("no facts stored about '{entity}'"))
            }
            Ok(facts) => {
                let lines: Vec<String> = facts
                    .iter()
                    .map(|f| {
                        format!(
                            "#{} {}.{} = {} (confidence {:.2})",
                            f.id, f.entity, f.attribute, f.value, f.confidence
                        )
                    })
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("lookup failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_lookup_through_alias() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        store.insert_alias("Nico", "nicolas_forstinger", 0.9).unwrap();
        let cancel = CancellationToken::new();

        let write = MemoryWriteTool::new(Arc::clone(&store), "u1");
        let result = write
            .execute(
                serde_json::json!({
                    "entity": "nicolas_forstinger",
                    "attribute": "nationality",
                    "value": "austrian"
                }),
                &cancel,
            )
            .await;
        assert!(!result.is_error);

        let lookup = LookupFactsTool::new(Arc::clone(&store));
        let result = lookup
            .execute(serde_json::json!({"entity": "Nico"}), &cancel)
            .await;
        assert!(result.content.contains("nationality = austrian"));
    }

    #[tokio::test]
    async fn forget_requires_valid_id() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let cancel = CancellationToken::new();
        let forget = MemoryForgetTool::new(store);
        let result = forget
            .execute(serde_json::json!({"fact_id": 12345}), &cancel)
            .await;
        assert!(result.is_error);
    }
}
