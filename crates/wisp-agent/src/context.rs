//! Context builder — assembles the message list for each provider turn.
//!
//! Tiers, stable first so an unchanged prefix can be provider-cached:
//!   1. persona files (stable)       workspace/persona/*.md
//!   2. skill index (stable)         workspace/skills/*.md
//!   3. structured recall (dynamic)  facts + open commitments
//!   4. unstructured recall (dynamic) indexed-workspace passages
//! followed by the session's message history.

use std::path::PathBuf;

use tracing::{debug, warn};

use wisp_core::types::SenderId;
use wisp_memory::MemoryStore;
use wisp_sessions::types::StoredMessage;

use crate::embed::EmbeddingProvider;
use crate::provider::SystemBlock;

const RECALL_K: usize = 5;
const DEFAULT_PERSONA: &str =
    "You are a helpful personal agent. When context is nearly full you will \
     see a bracketed warning — persist anything important with your memory \
     tools before it is compacted away. Reply with the single word SILENT \
     when no reply should be delivered.";

pub struct BuiltContext {
    pub system: Vec<SystemBlock>,
    pub messages: Vec<serde_json::Value>,
}

pub struct ContextBuilder {
    workspace: PathBuf,
}

impl ContextBuilder {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }

    pub async fn build(
        &self,
        sender: &SenderId,
        memory: &MemoryStore,
        embedder: Option<&dyn EmbeddingProvider>,
        history: &[StoredMessage],
    ) -> BuiltContext {
        let mut system = Vec::new();

        // Tier 1: persona. Stable across turns — cacheable.
        let persona = self.read_sorted_dir("persona").await;
        system.push(SystemBlock {
            text: if persona.is_empty() {
                DEFAULT_PERSONA.to_string()
            } else {
                persona
            },
            cacheable: true,
        });

        // Tier 2: skill index — file name plus first line of each skill.
        let skills = self.skill_index().await;
        if !skills.is_empty() {
            system.push(SystemBlock {
                text: skills,
                cacheable: true,
            });
        }

        // Tier 3: structured recall — facts about this sender + commitments.
        let structured = structured_block(sender, memory);
        if !structured.is_empty() {
            system.push(SystemBlock {
                text: structured,
                cacheable: false,
            });
        }

        // Tier 4: unstructured recall keyed on the latest user text.
        if let Some(query) = last_user_text(history) {
            let query_vec = match embedder {
                Some(e) => match e.embed(&[query.clone()]).await {
                    Ok(mut v) if v.len() == 1 => Some(v.remove(0)),
                    Ok(_) | Err(_) => None,
                },
                None => None,
            };
            match memory.recall(&query, query_vec.as_deref(), RECALL_K) {
                Ok(block) if !block.starts_with("[Memory loaded: none]") => {
                    system.push(SystemBlock {
                        text: format!("## Relevant memory\n{block}"),
                        cacheable: false,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "recall failed while building context"),
            }
        }

        let messages = history
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        wisp_sessions::types::Role::User => "user",
                        wisp_sessions::types::Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        debug!(tiers = system.len(), history = history.len(), "context built");
        BuiltContext { system, messages }
    }

    /// Concatenate every `.md` file in a workspace subdirectory, sorted by
    /// name. Missing directory means an empty tier.
    async fn read_sorted_dir(&self, sub: &str) -> String {
        let dir = self.workspace.join(sub);
        let mut names = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
                .collect::<Vec<_>>(),
            Err(_) => return String::new(),
        };
        names.sort();
        let mut out = String::new();
        for path in names {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    if !out.is_empty() {
                        out.push_str("\n\n");
                    }
                    out.push_str(&text);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "persona file unreadable"),
            }
        }
        out
    }

    /// Index of available skills: `- name: first line`.
    async fn skill_index(&self) -> String {
        let dir = self.workspace.join("skills");
        let mut entries = match std::fs::read_dir(&dir) {
            Ok(e) => e
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
                .collect::<Vec<_>>(),
            Err(_) => return String::new(),
        };
        entries.sort();
        let mut out = String::new();
        for path in entries {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let first_line = tokio::fs::read_to_string(&path)
                .await
                .ok()
                .and_then(|t| t.lines().find(|l| !l.trim().is_empty()).map(String::from))
                .unwrap_or_default();
            out.push_str(&format!("- {}: {}\n", name, first_line));
        }
        if out.is_empty() {
            String::new()
        } else {
            format!("## Skills (read the file in the workspace for details)\n{out}")
        }
    }
}

/// Facts about the sender plus all open commitments, rendered for the prompt.
fn structured_block(sender: &SenderId, memory: &MemoryStore) -> String {
    let mut out = String::new();

    match memory.lookup_facts(sender.as_str(), None) {
        Ok(facts) if !facts.is_empty() => {
            out.push_str("## Known facts about this correspondent\n");
            for f in &facts {
                out.push_str(&format!("- #{} {}: {}\n", f.id, f.attribute, f.value));
            }
        }
        _ => {}
    }

    match memory.get_open_commitments() {
        Ok(commitments) if !commitments.is_empty() => {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("## Open commitments\n");
            for c in &commitments {
                match &c.due_ts {
                    Some(due) => {
                        out.push_str(&format!("- #{} {} (due {})\n", c.id, c.description, due))
                    }
                    None => out.push_str(&format!("- #{} {}\n", c.id, c.description)),
                }
            }
        }
        _ => {}
    }

    out
}

/// The latest user turn's text, for the recall query.
fn last_user_text(history: &[StoredMessage]) -> Option<String> {
    let last = history
        .iter()
        .rev()
        .find(|m| matches!(m.role, wisp_sessions::types::Role::User))?;
    match &last.content {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(blocks) => blocks.iter().find_map(|b| {
            (b.get("type")?.as_str()? == "text")
                .then(|| b.get("text")?.as_str().map(String::from))
                .flatten()
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_sessions::types::Role;

    fn msg(role: Role, text: &str) -> StoredMessage {
        StoredMessage {
            role,
            content: serde_json::json!(text),
            tokens: 1,
        }
    }

    #[tokio::test]
    async fn persona_tier_is_first_and_cacheable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("persona")).unwrap();
        std::fs::write(dir.path().join("persona/00-core.md"), "I am Wisp.").unwrap();
        std::fs::write(dir.path().join("persona/10-tone.md"), "Keep it short.").unwrap();

        let builder = ContextBuilder::new(dir.path().to_path_buf());
        let memory = MemoryStore::open_in_memory().unwrap();
        let ctx = builder
            .build(&SenderId::from("u1"), &memory, None, &[])
            .await;

        assert!(ctx.system[0].cacheable);
        assert!(ctx.system[0].text.starts_with("I am Wisp."));
        assert!(ctx.system[0].text.contains("Keep it short."));
    }

    #[tokio::test]
    async fn structured_tier_carries_facts_and_commitments() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ContextBuilder::new(dir.path().to_path_buf());
        let memory = MemoryStore::open_in_memory().unwrap();
        memory
            .write_fact("u1", "timezone", "Europe/Vienna", 0.9, None)
            .unwrap();
        memory.insert_commitment("send the report", None).unwrap();

        let history = vec![msg(Role::User, "hello")];
        let ctx = builder
            .build(&SenderId::from("u1"), &memory, None, &history)
            .await;

        let dynamic: String = ctx
            .system
            .iter()
            .filter(|b| !b.cacheable)
            .map(|b| b.text.clone())
            .collect();
        assert!(dynamic.contains("timezone: Europe/Vienna"));
        assert!(dynamic.contains("send the report"));
        assert_eq!(ctx.messages.len(), 1);
    }

    #[test]
    fn last_user_text_reads_block_content() {
        let history = vec![StoredMessage {
            role: Role::User,
            content: serde_json::json!([
                {"type": "text", "text": "what about this image?"},
                {"type": "image", "source": {}}
            ]),
            tokens: 1,
        }];
        assert_eq!(
            last_user_text(&history).as_deref(),
            Some("what about this image?")
        );
    }
}
