use std::collections::HashMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::Source;

/// Maximum characters of a quoted message carried into the user turn.
pub const QUOTE_MAX_CHARS: usize = 200;
/// Hard cap on a single extracted document attachment, in bytes.
pub const DOCUMENT_TEXT_CAP: usize = 64 * 1024;

/// Top-level config (wisp.toml + WISP_* env overrides).
///
/// Immutable after load. A reload (SIGHUP) builds a fresh value and swaps the
/// shared `Arc` — running turns keep the version they started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WispConfig {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Named provider profiles. The routing table refers to these by key.
    #[serde(default)]
    pub providers: HashMap<String, ProviderProfile>,
    /// Routing table: message source name -> provider profile key.
    /// Sources not listed fall back to `agent.default_provider`.
    #[serde(default)]
    pub routing: HashMap<String, String>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root of the persona workspace (persona files, skills, notes).
    /// Also the default filesystem allow-root for tools.
    #[serde(default = "default_workspace_path")]
    pub path: PathBuf,
    /// State directory: snapshots, event logs, archive, databases, PID,
    /// monitor file.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: default_workspace_path(),
            state_dir: default_state_dir(),
        }
    }
}

impl WorkspaceConfig {
    pub fn archive_dir(&self) -> PathBuf {
        self.state_dir.join("archive")
    }

    pub fn memory_db_path(&self) -> PathBuf {
        self.state_dir.join("memory.db")
    }

    pub fn cost_db_path(&self) -> PathBuf {
        self.state_dir.join("costs.db")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join("wisp.pid")
    }

    pub fn monitor_path(&self) -> PathBuf {
        self.state_dir.join("monitor.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token for everything except GET /status.
    pub auth_token: Option<String>,
    /// Per-IP request budget per minute.
    #[serde(default = "default_rate_per_minute")]
    pub rate_per_minute: u32,
    /// Maximum accepted request body, in bytes.
    #[serde(default = "default_body_cap")]
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            auth_token: None,
            rate_per_minute: default_rate_per_minute(),
            max_body_bytes: default_body_cap(),
        }
    }
}

/// Agentic loop + orchestrator policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider profile used when the routing table has no entry for a source.
    #[serde(default = "default_provider_key")]
    pub default_provider: String,
    /// Profile used for compaction summaries and consolidation extraction.
    /// Falls back to `default_provider` when unset.
    pub utility_provider: Option<String>,
    /// Fraction of the context window that arms the pending warning.
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,
    /// Fraction of the context window that forces compaction.
    #[serde(default = "default_hard_threshold")]
    pub hard_threshold: f64,
    /// Fraction of session tokens folded into the compaction summary.
    #[serde(default = "default_compact_fraction")]
    pub compact_fraction: f64,
    /// Debounce grace window for coalescing rapid messages, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Bounded per-sender buffer; a full buffer rejects with backpressure.
    #[serde(default = "default_sender_buffer")]
    pub sender_buffer: usize,
    /// Maximum provider turns per inbound message.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Per-session dollar ceiling; the loop ends with a fallback reply once hit.
    #[serde(default = "default_cost_ceiling")]
    pub cost_ceiling_usd: f64,
    /// Wall-clock deadline for one provider call, in seconds.
    #[serde(default = "default_call_deadline")]
    pub call_deadline_secs: u64,
    /// Replies equal to any of these (whitespace-trimmed) are not delivered.
    #[serde(default = "default_silent_tokens")]
    pub silent_tokens: Vec<String>,
    /// Sources whose replies are never delivered anywhere.
    #[serde(default)]
    pub no_delivery_sources: Vec<String>,
    /// Warning text prepended to the next user message near the context limit.
    #[serde(default = "default_warning_text")]
    pub warning_text: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider_key(),
            utility_provider: None,
            warn_threshold: default_warn_threshold(),
            hard_threshold: default_hard_threshold(),
            compact_fraction: default_compact_fraction(),
            debounce_ms: default_debounce_ms(),
            sender_buffer: default_sender_buffer(),
            max_turns: default_max_turns(),
            cost_ceiling_usd: default_cost_ceiling(),
            call_deadline_secs: default_call_deadline(),
            silent_tokens: default_silent_tokens(),
            no_delivery_sources: Vec::new(),
            warning_text: default_warning_text(),
        }
    }
}

/// Which wire dialect a profile speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderApi {
    #[default]
    Anthropic,
    OpenaiCompat,
}

/// One LLM endpoint: model, window, pricing, capability flags.
///
/// Provider-specific defaults live here, never in the loop code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub model: String,
    #[serde(default)]
    pub api: ProviderApi,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_context_window")]
    pub context_window: u64,
    /// Dollars per million input tokens.
    #[serde(default)]
    pub input_price: f64,
    /// Dollars per million output tokens.
    #[serde(default)]
    pub output_price: f64,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Deny-by-default: usernames or numeric ids allowed to talk to the agent.
    #[serde(default)]
    pub allow_users: Vec<String>,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Registry assembly list — only named tools are registered.
    #[serde(default = "default_enabled_tools")]
    pub enabled: Vec<String>,
    /// Tools stripped from sub-agent registries (sessions_spawn is always
    /// stripped regardless).
    #[serde(default)]
    pub subagent_deny: Vec<String>,
    /// Filesystem allow-roots for path-accepting tools. Empty list means
    /// "workspace path only".
    #[serde(default)]
    pub allow_roots: Vec<PathBuf>,
    /// Env var name suffixes stripped from tool subprocess environments.
    #[serde(default = "default_secret_suffixes")]
    pub secret_suffixes: Vec<String>,
    /// Subprocess wall-clock limit, in seconds.
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_tools(),
            subagent_deny: Vec::new(),
            allow_roots: Vec::new(),
            secret_suffixes: default_secret_suffixes(),
            exec_timeout_secs: default_exec_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Deadline for the synchronous pre-compaction run, in milliseconds.
    /// Overruns are logged and compaction proceeds.
    #[serde(default = "default_precompact_deadline_ms")]
    pub precompact_deadline_ms: u64,
    /// Maximum transcript characters per extraction call.
    #[serde(default = "default_extract_chars")]
    pub max_extract_chars: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            precompact_deadline_ms: default_precompact_deadline_ms(),
            max_extract_chars: default_extract_chars(),
        }
    }
}

impl WispConfig {
    /// Load config from a TOML file with WISP_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: WispConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("WISP_").split("_"))
            .extract()
            .map_err(|e| crate::error::WispError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Profile key the routing table picks for a source.
    pub fn route_key(&self, source: &Source) -> &str {
        self.routing
            .get(source.as_str())
            .unwrap_or(&self.agent.default_provider)
    }

    /// Resolve the provider profile for a message source.
    ///
    /// Falls back to `agent.default_provider` for unrouted sources; a routing
    /// entry naming a missing profile is a configuration error.
    pub fn route(&self, source: &Source) -> crate::error::Result<&ProviderProfile> {
        let key = self.route_key(source).to_string();
        self.providers
            .get(&key)
            .ok_or(crate::error::WispError::UnknownProvider { name: key })
    }

    /// Profile used for compaction summaries and consolidation extraction.
    pub fn utility_profile(&self) -> crate::error::Result<&ProviderProfile> {
        let key = self
            .agent
            .utility_provider
            .as_ref()
            .unwrap_or(&self.agent.default_provider);
        self.providers
            .get(key)
            .ok_or_else(|| crate::error::WispError::UnknownProvider { name: key.clone() })
    }

    /// Effective filesystem allow-roots: configured list, or the workspace.
    pub fn allow_roots(&self) -> Vec<PathBuf> {
        if self.tools.allow_roots.is_empty() {
            vec![self.workspace.path.clone()]
        } else {
            self.tools.allow_roots.clone()
        }
    }
}

impl Default for WispConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig::default(),
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            providers: HashMap::new(),
            routing: HashMap::new(),
            embedding: EmbeddingConfig::default(),
            channels: ChannelsConfig::default(),
            tools: ToolsConfig::default(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    18920
}
fn default_rate_per_minute() -> u32 {
    60
}
fn default_body_cap() -> usize {
    256 * 1024
}
fn default_provider_key() -> String {
    "main".to_string()
}
fn default_warn_threshold() -> f64 {
    0.8
}
fn default_hard_threshold() -> f64 {
    0.9
}
fn default_compact_fraction() -> f64 {
    0.5
}
fn default_debounce_ms() -> u64 {
    250
}
fn default_sender_buffer() -> usize {
    8
}
fn default_max_turns() -> u32 {
    25
}
fn default_cost_ceiling() -> f64 {
    2.0
}
fn default_call_deadline() -> u64 {
    180
}
fn default_silent_tokens() -> Vec<String> {
    vec!["SILENT".to_string(), "NO_REPLY".to_string()]
}
fn default_warning_text() -> String {
    "[context nearly full — persist anything important now]".to_string()
}
fn default_context_window() -> u64 {
    200_000
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_max_attachment_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_enabled_tools() -> Vec<String> {
    [
        "read_file",
        "write_file",
        "edit_file",
        "exec",
        "web_fetch",
        "memory_recall",
        "memory_write",
        "memory_forget",
        "lookup_facts",
        "commitment_update",
        "sessions_spawn",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_secret_suffixes() -> Vec<String> {
    vec![
        "_KEY".to_string(),
        "_TOKEN".to_string(),
        "_SECRET".to_string(),
        "_PASSWORD".to_string(),
    ]
}
fn default_exec_timeout() -> u64 {
    30
}
fn default_precompact_deadline_ms() -> u64 {
    2_000
}
fn default_extract_chars() -> usize {
    24_000
}

fn default_workspace_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".wisp/workspace")
}
fn default_state_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".wisp/state")
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.wisp/wisp.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_providers() -> WispConfig {
        let mut cfg = WispConfig::default();
        cfg.providers.insert(
            "main".to_string(),
            ProviderProfile {
                model: "claude-sonnet-4-6".to_string(),
                api: ProviderApi::Anthropic,
                base_url: None,
                api_key: Some("k".to_string()),
                context_window: 200_000,
                input_price: 3.0,
                output_price: 15.0,
                supports_vision: true,
                max_tokens: 4096,
            },
        );
        cfg.providers.insert(
            "cheap".to_string(),
            ProviderProfile {
                model: "gpt-4o-mini".to_string(),
                api: ProviderApi::OpenaiCompat,
                base_url: Some("https://api.openai.com".to_string()),
                api_key: Some("k".to_string()),
                context_window: 128_000,
                input_price: 0.15,
                output_price: 0.6,
                supports_vision: false,
                max_tokens: 4096,
            },
        );
        cfg.routing
            .insert("system".to_string(), "cheap".to_string());
        cfg
    }

    #[test]
    fn route_uses_table_then_default() {
        let cfg = config_with_providers();
        let system = cfg.route(&Source::System).unwrap();
        assert_eq!(system.model, "gpt-4o-mini");
        let telegram = cfg.route(&Source::Telegram).unwrap();
        assert_eq!(telegram.model, "claude-sonnet-4-6");
    }

    #[test]
    fn route_missing_profile_is_config_error() {
        let mut cfg = config_with_providers();
        cfg.routing
            .insert("cli".to_string(), "nonexistent".to_string());
        assert!(cfg.route(&Source::Cli).is_err());
    }

    #[test]
    fn allow_roots_default_to_workspace() {
        let cfg = config_with_providers();
        let roots = cfg.allow_roots();
        assert_eq!(roots, vec![cfg.workspace.path.clone()]);
    }

    #[test]
    fn thresholds_have_sane_defaults() {
        let cfg = WispConfig::default();
        assert!(cfg.agent.warn_threshold < cfg.agent.hard_threshold);
        assert!(cfg.agent.debounce_ms >= 10 && cfg.agent.debounce_ms <= 1000);
    }
}
