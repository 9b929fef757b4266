//! Durable per-sender sessions: snapshot + audit log + compaction.
//!
//! Persistence order is fixed: mutate in memory → write snapshot (temp file,
//! rename) → append audit event. A crash between snapshot and event loses one
//! audit line, which is re-derivable; the reverse order could leave a snapshot
//! behind the log, which is not.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use wisp_core::types::SenderId;

use crate::error::{Result, SessionError};
use crate::log as event_log;
use crate::types::{estimate_tokens, Event, EventPayload, Role, SessionState, StoredMessage};

/// Hooks fired around session lifecycle transitions. Consolidation registers
/// one of these so structured memory is extracted before context is discarded.
#[async_trait]
pub trait SessionHook: Send + Sync {
    /// Fired synchronously before compaction discards messages. Given the
    /// messages about to be folded away.
    async fn on_pre_compaction(&self, sender: &SenderId, doomed: &[StoredMessage]);

    /// Fired when a session is closed, before its logs are archived.
    async fn on_close(&self, sender: &SenderId);
}

/// Produces the "earlier conversation summary" text during compaction.
/// Implemented by the daemon wiring with a dedicated LLM call.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> std::result::Result<String, String>;
}

/// Owner of all live sessions. The orchestrator serialises work per sender;
/// the per-session `tokio::Mutex` makes that safe even if it doesn't.
pub struct SessionManager {
    state_dir: PathBuf,
    log_dir: PathBuf,
    archive_dir: PathBuf,
    sessions: std::sync::Mutex<HashMap<SenderId, Arc<Mutex<SessionState>>>>,
    hooks: Vec<Arc<dyn SessionHook>>,
    summarizer: Arc<dyn Summarizer>,
    /// Fraction of session tokens folded into a compaction summary.
    compact_fraction: f64,
    /// Deadline for the synchronous pre-compaction hooks.
    hook_deadline: Duration,
}

impl SessionManager {
    pub fn new(
        state_dir: PathBuf,
        archive_dir: PathBuf,
        summarizer: Arc<dyn Summarizer>,
        compact_fraction: f64,
        hook_deadline: Duration,
    ) -> Self {
        Self {
            log_dir: state_dir.join("logs"),
            state_dir,
            archive_dir,
            sessions: std::sync::Mutex::new(HashMap::new()),
            hooks: Vec::new(),
            summarizer,
            compact_fraction,
            hook_deadline,
        }
    }

    pub fn register_hook(&mut self, hook: Arc<dyn SessionHook>) {
        self.hooks.push(hook);
    }

    fn snapshot_path(&self, sender: &SenderId) -> PathBuf {
        self.state_dir
            .join(format!("{}.state", event_log::file_stem(sender.as_str())))
    }

    /// Return the live session, loading the snapshot from disk on first
    /// touch. A corrupt snapshot is an operator-visible error — the session
    /// is never silently recreated over it.
    #[instrument(skip(self), fields(sender = %sender))]
    pub fn get_or_create(&self, sender: &SenderId) -> Result<Arc<Mutex<SessionState>>> {
        let mut index = self.sessions.lock().unwrap();
        if let Some(existing) = index.get(sender) {
            return Ok(Arc::clone(existing));
        }

        let path = self.snapshot_path(sender);
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let state: SessionState =
                serde_json::from_str(&raw).map_err(|e| SessionError::CorruptSnapshot {
                    sender: sender.to_string(),
                    reason: e.to_string(),
                })?;
            debug!(messages = state.messages.len(), "session loaded from snapshot");
            state
        } else {
            debug!("new session");
            SessionState::new(sender.as_str())
        };

        let arc = Arc::new(Mutex::new(state));
        index.insert(sender.clone(), Arc::clone(&arc));
        Ok(arc)
    }

    /// Write the snapshot atomically: temp file in the same directory, then
    /// rename over the live path so readers observe old-or-new, never torn.
    fn write_snapshot(&self, state: &SessionState) -> Result<()> {
        fs::create_dir_all(&self.state_dir)?;
        let final_path = self
            .state_dir
            .join(format!("{}.state", event_log::file_stem(&state.sender)));
        let tmp_path = final_path.with_extension("state.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn persist(&self, sender: &SenderId, state: &SessionState, event: Event) -> Result<()> {
        // Snapshot first, audit line second (see module docs).
        self.write_snapshot(state)?;
        event_log::append_event(&self.log_dir, sender.as_str(), &event)?;
        Ok(())
    }

    /// Append a user turn. `content` is the fully-composed provider content
    /// (warning prefix, quote prefix, and attachment blocks already applied
    /// by the orchestrator).
    pub async fn append_user(&self, sender: &SenderId, content: serde_json::Value) -> Result<()> {
        let session = self.get_or_create(sender)?;
        let mut state = session.lock().await;
        let tokens = estimate_tokens(&content);
        state.messages.push(StoredMessage {
            role: Role::User,
            content: content.clone(),
            tokens,
        });
        state.total_tokens += tokens;
        self.persist(sender, &state, Event::now(EventPayload::User { content }))
    }

    pub async fn append_assistant(
        &self,
        sender: &SenderId,
        content: serde_json::Value,
    ) -> Result<()> {
        let session = self.get_or_create(sender)?;
        let mut state = session.lock().await;
        let tokens = estimate_tokens(&content);
        state.messages.push(StoredMessage {
            role: Role::Assistant,
            content: content.clone(),
            tokens,
        });
        state.total_tokens += tokens;
        self.persist(sender, &state, Event::now(EventPayload::Assistant { content }))
    }

    /// Record a tool invocation in the audit log. Tool calls ride inside the
    /// assistant content blocks, so only the event line is written here —
    /// the in-memory state is untouched.
    pub async fn append_tool_call(
        &self,
        sender: &SenderId,
        id: &str,
        name: &str,
        input: serde_json::Value,
    ) -> Result<()> {
        event_log::append_event(
            &self.log_dir,
            sender.as_str(),
            &Event::now(EventPayload::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }),
        )
    }

    /// Append tool results as a user-role message (provider convention) and
    /// record each result in the audit log.
    pub async fn append_tool_results(
        &self,
        sender: &SenderId,
        content: serde_json::Value,
        results: &[(String, String, bool)],
    ) -> Result<()> {
        let session = self.get_or_create(sender)?;
        let mut state = session.lock().await;
        let tokens = estimate_tokens(&content);
        state.messages.push(StoredMessage {
            role: Role::User,
            content,
            tokens,
        });
        state.total_tokens += tokens;
        self.write_snapshot(&state)?;
        for (id, text, is_error) in results {
            event_log::append_event(
                &self.log_dir,
                sender.as_str(),
                &Event::now(EventPayload::ToolResult {
                    id: id.clone(),
                    content: text.clone(),
                    is_error: *is_error,
                }),
            )?;
        }
        Ok(())
    }

    /// Arm the pending context warning and persist it before any work that
    /// might crash.
    pub async fn set_pending_warning(&self, sender: &SenderId) -> Result<()> {
        let session = self.get_or_create(sender)?;
        let mut state = session.lock().await;
        if state.pending_warning {
            return Ok(());
        }
        state.pending_warning = true;
        self.write_snapshot(&state)
    }

    /// Clear the pending warning flag, persist the clear, and report whether
    /// it was set. The caller prepends the warning text to the user turn it
    /// is about to append.
    pub async fn take_pending_warning(&self, sender: &SenderId) -> Result<bool> {
        let session = self.get_or_create(sender)?;
        let mut state = session.lock().await;
        if !state.pending_warning {
            return Ok(false);
        }
        state.pending_warning = false;
        self.write_snapshot(&state)?;
        Ok(true)
    }

    /// Current token total and compaction count, for threshold decisions.
    pub async fn totals(&self, sender: &SenderId) -> Result<(u64, u32, bool)> {
        let session = self.get_or_create(sender)?;
        let state = session.lock().await;
        Ok((
            state.total_tokens,
            state.compaction_count,
            state.pending_warning,
        ))
    }

    /// Working message list for the context builder.
    pub async fn messages(&self, sender: &SenderId) -> Result<Vec<StoredMessage>> {
        let session = self.get_or_create(sender)?;
        let state = session.lock().await;
        Ok(state.messages.clone())
    }

    /// Compact the session: fire pre-compaction hooks (bounded), summarise
    /// the oldest prefix via the summarizer, replace it in place, re-credit
    /// tokens, and persist.
    #[instrument(skip(self), fields(sender = %sender))]
    pub async fn compact(&self, sender: &SenderId) -> Result<()> {
        let session = self.get_or_create(sender)?;
        let mut state = session.lock().await;

        // Oldest contiguous prefix whose tokens exceed the compaction share.
        let target = (state.total_tokens as f64 * self.compact_fraction) as u64;
        let mut acc = 0u64;
        let mut cut = 0usize;
        for (i, msg) in state.messages.iter().enumerate() {
            acc += msg.tokens;
            cut = i + 1;
            if acc >= target {
                break;
            }
        }
        // Always keep at least the latest exchange out of the summary.
        cut = cut.min(state.messages.len().saturating_sub(2));
        if cut == 0 {
            debug!("nothing to compact");
            return Ok(());
        }

        let doomed: Vec<StoredMessage> = state.messages[..cut].to_vec();

        // Consolidation must see these messages before they are discarded,
        // but it must not hold up interactive latency indefinitely.
        for hook in &self.hooks {
            if tokio::time::timeout(self.hook_deadline, hook.on_pre_compaction(sender, &doomed))
                .await
                .is_err()
            {
                warn!(sender = %sender, "pre-compaction hook exceeded deadline, proceeding");
            }
        }

        let transcript = render_transcript(&doomed);
        let summary = self
            .summarizer
            .summarize(&transcript)
            .await
            .map_err(SessionError::Summarizer)?;

        let summary_content =
            serde_json::json!(format!("[Earlier conversation summary]\n{}", summary));
        let summary_tokens = estimate_tokens(&summary_content);
        let removed_tokens: u64 = doomed.iter().map(|m| m.tokens).sum();

        state.messages.splice(
            ..cut,
            [StoredMessage {
                role: Role::Assistant,
                content: summary_content,
                tokens: summary_tokens,
            }],
        );
        state.total_tokens = state.total_tokens - removed_tokens + summary_tokens;
        state.compaction_count += 1;

        info!(
            replaced = cut,
            summary_tokens,
            total_tokens = state.total_tokens,
            "session compacted"
        );

        self.persist(
            sender,
            &state,
            Event::now(EventPayload::Compaction {
                replaced_messages: cut,
                summary_tokens,
            }),
        )
    }

    /// Close a session: fire on_close hooks, write the close event, archive
    /// the log files and snapshot, and drop it from the in-memory index.
    #[instrument(skip(self), fields(sender = %sender))]
    pub async fn close(&self, sender: &SenderId) -> Result<()> {
        for hook in &self.hooks {
            hook.on_close(sender).await;
        }

        event_log::append_event(
            &self.log_dir,
            sender.as_str(),
            &Event::now(EventPayload::Close),
        )?;

        fs::create_dir_all(&self.archive_dir)?;
        for file in event_log::session_log_files(&self.log_dir, sender.as_str())? {
            if let Some(name) = file.file_name() {
                fs::rename(&file, self.archive_dir.join(name))?;
            }
        }
        let snapshot = self.snapshot_path(sender);
        if snapshot.exists() {
            if let Some(name) = snapshot.file_name() {
                fs::rename(&snapshot, self.archive_dir.join(name))?;
            }
        }

        self.sessions.lock().unwrap().remove(sender);
        info!("session closed and archived");
        Ok(())
    }

    /// Senders with a live in-memory session.
    pub fn active_senders(&self) -> Vec<SenderId> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }

    pub fn log_dir(&self) -> &std::path::Path {
        &self.log_dir
    }
}

/// Plain-text rendering of messages for the summariser prompt.
fn render_transcript(messages: &[StoredMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "USER",
                Role::Assistant => "ASSISTANT",
            };
            let text = match &m.content {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}: {}", role, text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSummarizer;

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _transcript: &str) -> std::result::Result<String, String> {
            Ok("they talked about the weather".to_string())
        }
    }

    fn manager(dir: &std::path::Path) -> SessionManager {
        SessionManager::new(
            dir.to_path_buf(),
            dir.join("archive"),
            Arc::new(FixedSummarizer),
            0.5,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let sender = SenderId::from("u1");
        {
            let mgr = manager(dir.path());
            mgr.append_user(&sender, serde_json::json!("hello there"))
                .await
                .unwrap();
            mgr.append_assistant(&sender, serde_json::json!("hi"))
                .await
                .unwrap();
        }
        // Fresh manager — simulates a restart.
        let mgr = manager(dir.path());
        let messages = mgr.messages(&sender).await.unwrap();
        assert_eq!(messages.len(), 2);
        let (tokens, compactions, warning) = mgr.totals(&sender).await.unwrap();
        assert!(tokens > 0);
        assert_eq!(compactions, 0);
        assert!(!warning);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sender = SenderId::from("u2");
        let mgr = manager(dir.path());
        fs::write(dir.path().join("u2.state"), "not json {").unwrap();
        let err = mgr.get_or_create(&sender).unwrap_err();
        assert!(matches!(err, SessionError::CorruptSnapshot { .. }));
    }

    #[tokio::test]
    async fn warning_set_then_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let sender = SenderId::from("u3");
        let mgr = manager(dir.path());
        mgr.append_user(&sender, serde_json::json!("x")).await.unwrap();
        mgr.set_pending_warning(&sender).await.unwrap();

        // The set must be observable from a cold reload before it is taken.
        let fresh = manager(dir.path());
        let (_, _, pending) = fresh.totals(&sender).await.unwrap();
        assert!(pending);

        assert!(mgr.take_pending_warning(&sender).await.unwrap());
        assert!(!mgr.take_pending_warning(&sender).await.unwrap());
    }

    #[tokio::test]
    async fn compact_replaces_prefix_and_recredits_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let sender = SenderId::from("u4");
        let mgr = manager(dir.path());
        for i in 0..6 {
            mgr.append_user(&sender, serde_json::json!(format!("question {i} {}", "pad ".repeat(50))))
                .await
                .unwrap();
            mgr.append_assistant(&sender, serde_json::json!(format!("answer {i} {}", "pad ".repeat(50))))
                .await
                .unwrap();
        }
        let (before_tokens, _, _) = mgr.totals(&sender).await.unwrap();

        mgr.compact(&sender).await.unwrap();

        let messages = mgr.messages(&sender).await.unwrap();
        let (after_tokens, compactions, _) = mgr.totals(&sender).await.unwrap();
        assert!(messages.len() < 12);
        assert_eq!(compactions, 1);
        assert!(after_tokens < before_tokens);
        // First message is now the summary.
        let first = messages[0].content.as_str().unwrap();
        assert!(first.starts_with("[Earlier conversation summary]"));
        // Token total equals the sum of per-message weights.
        let sum: u64 = messages.iter().map(|m| m.tokens).sum();
        assert_eq!(sum, after_tokens);
    }

    #[tokio::test]
    async fn close_archives_logs_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let sender = SenderId::from("u5");
        let mgr = manager(dir.path());
        mgr.append_user(&sender, serde_json::json!("bye")).await.unwrap();
        mgr.close(&sender).await.unwrap();

        assert!(!dir.path().join("u5.state").exists());
        let archived: Vec<_> = fs::read_dir(dir.path().join("archive"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(archived.iter().any(|n| n.ends_with(".state")));
        assert!(archived.iter().any(|n| n.ends_with(".jsonl")));
        assert!(mgr.active_senders().is_empty());
    }

    #[tokio::test]
    async fn slow_hook_does_not_block_compaction() {
        struct SlowHook;
        #[async_trait]
        impl SessionHook for SlowHook {
            async fn on_pre_compaction(&self, _s: &SenderId, _d: &[StoredMessage]) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            async fn on_close(&self, _s: &SenderId) {}
        }

        let dir = tempfile::tempdir().unwrap();
        let sender = SenderId::from("u6");
        let mut mgr = manager(dir.path());
        mgr.register_hook(Arc::new(SlowHook));
        for _ in 0..4 {
            mgr.append_user(&sender, serde_json::json!("long ".repeat(100)))
                .await
                .unwrap();
            mgr.append_assistant(&sender, serde_json::json!("ok ".repeat(100)))
                .await
                .unwrap();
        }
        let started = std::time::Instant::now();
        mgr.compact(&sender).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
