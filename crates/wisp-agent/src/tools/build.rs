//! Registry assembly — the one place tools are constructed and enabled.

use std::sync::Arc;
use std::time::Duration;

use wisp_core::WispConfig;
use wisp_memory::MemoryStore;

use crate::embed::EmbeddingProvider;
use crate::provider::Provider;

use super::commitment::CommitmentUpdateTool;
use super::edit_file::EditFileTool;
use super::exec::ExecTool;
use super::memory_tools::{LookupFactsTool, MemoryForgetTool, MemoryRecallTool, MemoryWriteTool};
use super::read_file::ReadFileTool;
use super::spawn::SpawnTool;
use super::web_fetch::WebFetchTool;
use super::write_file::WriteFileTool;
use super::{Tool, ToolRegistry};

/// Build the full registry for a session from the config enable-list.
///
/// The sub-agent view is computed here too: the spawn tool receives the base
/// registry filtered through `subagent_view`, so the deny-list (plus the
/// always-on no-recursion rule) is enforced by assembly, never by handlers.
pub fn build_registry(
    config: &WispConfig,
    store: Arc<MemoryStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    provider: Arc<dyn Provider>,
    session: &str,
) -> Arc<ToolRegistry> {
    let allow_roots = config.allow_roots();
    let exec_timeout = Duration::from_secs(config.tools.exec_timeout_secs);

    let base: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ReadFileTool::new(allow_roots.clone())),
        Arc::new(WriteFileTool::new(allow_roots.clone())),
        Arc::new(EditFileTool::new(allow_roots.clone())),
        Arc::new(ExecTool::new(
            config.tools.secret_suffixes.clone(),
            exec_timeout,
            config.workspace.path.clone(),
        )),
        Arc::new(WebFetchTool),
        Arc::new(MemoryRecallTool::new(
            Arc::clone(&store),
            embedder.clone(),
        )),
        Arc::new(MemoryWriteTool::new(Arc::clone(&store), session)),
        Arc::new(MemoryForgetTool::new(Arc::clone(&store))),
        Arc::new(LookupFactsTool::new(Arc::clone(&store))),
        Arc::new(CommitmentUpdateTool::new(Arc::clone(&store))),
    ];

    let base_registry = ToolRegistry::assemble(base.clone(), &config.tools.enabled);
    let subagent_tools = Arc::new(base_registry.subagent_view(&config.tools.subagent_deny));

    let profile = config
        .utility_profile()
        .or_else(|_| config.route(&wisp_core::types::Source::System))
        .ok();
    let (model, max_tokens) = match profile {
        Some(p) => (p.model.clone(), p.max_tokens),
        None => ("claude-sonnet-4-6".to_string(), 1024),
    };

    let mut all = base;
    all.push(Arc::new(SpawnTool::new(
        provider,
        model,
        max_tokens,
        subagent_tools,
    )));

    Arc::new(ToolRegistry::assemble(all, &config.tools.enabled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatRequest, Completion, ProviderError};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct NoopProvider;

    #[async_trait]
    impl Provider for NoopProvider {
        fn name(&self) -> &str {
            "noop"
        }
        async fn complete(
            &self,
            _req: &ChatRequest,
            _cancel: &CancellationToken,
        ) -> Result<Completion, ProviderError> {
            Err(ProviderError::Permanent {
                status: 0,
                message: "noop".into(),
            })
        }
    }

    #[test]
    fn enable_list_controls_what_exists() {
        let mut config = WispConfig::default();
        config.tools.enabled = vec!["read_file".to_string(), "exec".to_string()];
        let registry = build_registry(
            &config,
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            None,
            Arc::new(NoopProvider),
            "test",
        );
        assert!(registry.get("read_file").is_some());
        assert!(registry.get("exec").is_some());
        assert!(registry.get("web_fetch").is_none());
        assert!(registry.get("sessions_spawn").is_none());
    }

    #[test]
    fn default_enable_list_includes_spawn_minus_recursion() {
        let config = WispConfig::default();
        let registry = build_registry(
            &config,
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            None,
            Arc::new(NoopProvider),
            "test",
        );
        assert!(registry.get("sessions_spawn").is_some());
        let sub = registry.subagent_view(&config.tools.subagent_deny);
        assert!(sub.get("sessions_spawn").is_none());
        assert!(sub.get("read_file").is_some());
    }
}
