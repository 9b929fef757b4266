//! Consolidation worker — turns finished session logs into structured
//! memory. Runs from the offline binary on a schedule, and inline from the
//! daemon's pre-compaction and close hooks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wisp_core::types::SenderId;
use wisp_memory::MemoryStore;
use wisp_sessions::types::{EventPayload, StoredMessage};
use wisp_sessions::{log as event_log, SessionHook};

use crate::content_hash;
use crate::error::Result;
use crate::extract::Extractor;

pub struct ConsolidationWorker {
    store: Arc<MemoryStore>,
    extractor: Arc<Extractor>,
    /// Live log directory — set in the daemon so `on_close` can sweep a
    /// sender's files before they are archived.
    log_dir: Option<PathBuf>,
}

impl ConsolidationWorker {
    pub fn new(store: Arc<MemoryStore>, extractor: Arc<Extractor>) -> Self {
        Self {
            store,
            extractor,
            log_dir: None,
        }
    }

    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.log_dir = Some(log_dir);
        self
    }

    /// Consolidate every unprocessed (or changed) log file in a directory.
    /// Returns how many files were actually processed.
    pub async fn run_over_dir(&self, log_dir: &Path, cancel: &CancellationToken) -> Result<usize> {
        let mut files: Vec<PathBuf> = match std::fs::read_dir(log_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
                .collect(),
            Err(e) => {
                warn!(dir = %log_dir.display(), error = %e, "log dir unreadable");
                return Ok(0);
            }
        };
        files.sort();

        let mut processed = 0usize;
        for file in files {
            if cancel.is_cancelled() {
                break;
            }
            if self.consolidate_file(&file, cancel).await? {
                processed += 1;
            }
        }
        info!(processed, "consolidation sweep complete");
        Ok(processed)
    }

    /// Consolidate one log file. Skips (returns false) when the stored hash
    /// says this exact content was already processed — re-runs are no-ops.
    pub async fn consolidate_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let bytes = std::fs::read(path)?;
        let hash = content_hash(&bytes);
        let key = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        if self.store.is_consolidated(&key, &hash)? {
            debug!(file = %key, "unchanged since last consolidation, skipping");
            return Ok(false);
        }

        let events = event_log::read_events(path)?;
        let transcript = transcript_from_events(&events);
        if transcript.trim().is_empty() {
            self.store.mark_consolidated(&key, &hash)?;
            return Ok(false);
        }

        // Session label: the file stem before the date suffix.
        let session = key.split('.').next().unwrap_or(&key).to_string();

        let extraction = self.extractor.extract(&transcript, cancel).await?;
        self.extractor.apply(&self.store, &extraction, &session)?;
        self.store.mark_consolidated(&key, &hash)?;
        Ok(true)
    }

    /// Consolidate an in-memory transcript (the pre-compaction path, where
    /// the messages are about to be discarded and no file hash applies).
    pub async fn consolidate_messages(
        &self,
        sender: &SenderId,
        messages: &[StoredMessage],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let transcript = transcript_from_messages(messages);
        if transcript.trim().is_empty() {
            return Ok(());
        }
        let extraction = self.extractor.extract(&transcript, cancel).await?;
        self.extractor.apply(&self.store, &extraction, sender.as_str())
    }
}

/// The worker doubles as a session hook: extraction fires before compaction
/// discards messages, and a close sweeps the sender's log files.
#[async_trait]
impl SessionHook for ConsolidationWorker {
    async fn on_pre_compaction(&self, sender: &SenderId, doomed: &[StoredMessage]) {
        let cancel = CancellationToken::new();
        if let Err(e) = self.consolidate_messages(sender, doomed, &cancel).await {
            warn!(sender = %sender, error = %e, "pre-compaction consolidation failed");
        }
    }

    async fn on_close(&self, sender: &SenderId) {
        // Logs are still in the live dir at this point — close archives them
        // only after the hooks return.
        let Some(log_dir) = &self.log_dir else {
            return;
        };
        let cancel = CancellationToken::new();
        let files = match event_log::session_log_files(log_dir, sender.as_str()) {
            Ok(files) => files,
            Err(e) => {
                warn!(sender = %sender, error = %e, "close-time log listing failed");
                return;
            }
        };
        for file in files {
            if let Err(e) = self.consolidate_file(&file, &cancel).await {
                warn!(sender = %sender, file = %file.display(), error = %e, "close-time consolidation failed");
            }
        }
    }
}

fn transcript_from_events(events: &[wisp_sessions::Event]) -> String {
    events
        .iter()
        .filter_map(|ev| match &ev.payload {
            EventPayload::User { content } => Some(format!("USER: {}", content_text(content))),
            EventPayload::Assistant { content } => {
                Some(format!("ASSISTANT: {}", content_text(content)))
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn transcript_from_messages(messages: &[StoredMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                wisp_sessions::types::Role::User => "USER",
                wisp_sessions::types::Role::Assistant => "ASSISTANT",
            };
            format!("{}: {}", role, content_text(&m.content))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Human-readable text of a message content value — plain strings pass
/// through, block arrays contribute their text blocks.
fn content_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| {
                if b.get("type").and_then(|t| t.as_str()) == Some("text") {
                    b.get("text").and_then(|t| t.as_str()).map(String::from)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wisp_agent::provider::{ChatRequest, Completion, Provider, ProviderError, Usage};

    /// Provider that returns a canned extraction and counts its calls.
    struct CountingProvider {
        calls: Mutex<u32>,
        reply: String,
    }

    #[async_trait]
    impl Provider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }
        async fn complete(
            &self,
            _req: &ChatRequest,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Completion, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            Ok(Completion {
                content: self.reply.clone(),
                model: "m".into(),
                stop_reason: "end_turn".into(),
                tool_calls: Vec::new(),
                usage: Usage::default(),
            })
        }
    }

    fn extraction_reply() -> String {
        serde_json::json!({
            "aliases": [{"alias": "Nicolas Forstinger", "canonical": "nicolas_forstinger", "confidence": 0.9}],
            "facts": [{"entity": "nicolas_forstinger", "attribute": "nationality", "value": "austrian", "confidence": 0.9}],
            "episodes": [{"title": "Introductions", "body": "User introduced themselves."}],
            "commitments": []
        })
        .to_string()
    }

    fn write_log(dir: &Path, sender: &str, lines: &[&str]) -> PathBuf {
        for line in lines {
            event_log::append_event(
                dir,
                sender,
                &wisp_sessions::Event::now(EventPayload::User {
                    content: serde_json::json!(line),
                }),
            )
            .unwrap();
        }
        event_log::session_log_files(dir, sender).unwrap().remove(0)
    }

    #[tokio::test]
    async fn consolidation_is_idempotent_on_unchanged_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let provider = Arc::new(CountingProvider {
            calls: Mutex::new(0),
            reply: extraction_reply(),
        });
        let extractor = Arc::new(Extractor::new(
            Arc::clone(&provider) as Arc<dyn Provider>,
            "m".into(),
            512,
            10_000,
        ));
        let worker = ConsolidationWorker::new(Arc::clone(&store), extractor);
        let cancel = CancellationToken::new();

        let log = write_log(dir.path(), "u1", &["Nicolas Forstinger is Austrian"]);

        assert!(worker.consolidate_file(&log, &cancel).await.unwrap());
        assert!(!worker.consolidate_file(&log, &cancel).await.unwrap());
        assert_eq!(*provider.calls.lock().unwrap(), 1);

        // Same facts either way.
        let facts = store.lookup_facts("Nicolas Forstinger", None).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].entity, "nicolas_forstinger");
    }

    #[tokio::test]
    async fn changed_log_is_reprocessed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let provider = Arc::new(CountingProvider {
            calls: Mutex::new(0),
            reply: extraction_reply(),
        });
        let extractor = Arc::new(Extractor::new(
            Arc::clone(&provider) as Arc<dyn Provider>,
            "m".into(),
            512,
            10_000,
        ));
        let worker = ConsolidationWorker::new(Arc::clone(&store), extractor);
        let cancel = CancellationToken::new();

        let log = write_log(dir.path(), "u2", &["hello"]);
        assert!(worker.consolidate_file(&log, &cancel).await.unwrap());

        // Append another line — content hash changes.
        write_log(dir.path(), "u2", &["more text"]);
        assert!(worker.consolidate_file(&log, &cancel).await.unwrap());
        assert_eq!(*provider.calls.lock().unwrap(), 2);
    }

    #[test]
    fn block_content_contributes_only_text() {
        let content = serde_json::json!([
            {"type": "text", "text": "visible"},
            {"type": "tool_use", "id": "t", "name": "exec", "input": {}}
        ]);
        assert_eq!(content_text(&content), "visible");
    }
}
