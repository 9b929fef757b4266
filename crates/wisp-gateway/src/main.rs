//! wisp-gateway — the daemon binary.
//!
//! Wires config, providers, stores, the session manager (with its
//! consolidation hooks), channel adapters, and the HTTP control API, then
//! serves until SIGINT/SIGTERM. SIGHUP reloads the config in place.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use wisp_agent::anthropic::AnthropicProvider;
use wisp_agent::embed::{EmbeddingProvider, OpenAiEmbeddings};
use wisp_agent::openai::OpenAiProvider;
use wisp_agent::Provider;
use wisp_channels::Channel;
use wisp_consolidate::{ConsolidationWorker, Extractor};
use wisp_core::config::ProviderApi;
use wisp_core::WispConfig;
use wisp_memory::{CostStore, MemoryStore};
use wisp_sessions::SessionManager;

mod app;
mod cli;
mod http;
mod orchestrator;
mod summarize;

use app::AppState;

#[derive(Parser)]
#[command(name = "wisp-gateway", about = "Persona agent daemon")]
struct Args {
    /// Path to wisp.toml (defaults to ~/.wisp/wisp.toml).
    #[arg(long)]
    config: Option<String>,
    /// Also read messages from stdin as a local channel.
    #[arg(long)]
    cli: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wisp_gateway=info,wisp_agent=info,tower_http=warn".into()),
        )
        .init();

    let args = Args::parse();
    let config = WispConfig::load(args.config.as_deref())?;
    std::fs::create_dir_all(&config.workspace.state_dir)?;
    std::fs::create_dir_all(&config.workspace.path)?;

    // Providers, one instance per profile.
    let providers = build_providers(&config);
    if providers.is_empty() {
        anyhow::bail!("no [providers.*] profiles configured");
    }

    let embedder: Option<Arc<dyn EmbeddingProvider>> =
        config.embedding.api_key.as_ref().map(|key| {
            Arc::new(OpenAiEmbeddings::new(
                key.clone(),
                config.embedding.base_url.clone(),
                config.embedding.model.clone(),
            )) as Arc<dyn EmbeddingProvider>
        });

    let memory = Arc::new(MemoryStore::open(&config.workspace.memory_db_path())?);
    let costs = Arc::new(CostStore::open(&config.workspace.cost_db_path())?);

    // Utility provider drives compaction summaries and consolidation.
    let utility_profile = config.utility_profile()?.clone();
    let utility_provider = providers
        .get(
            config
                .agent
                .utility_provider
                .as_deref()
                .unwrap_or(&config.agent.default_provider),
        )
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("utility provider profile has no instance"))?;

    let summarizer = Arc::new(summarize::LlmSummarizer::new(
        Arc::clone(&utility_provider),
        utility_profile.model.clone(),
        utility_profile.max_tokens,
    ));

    let mut sessions = SessionManager::new(
        config.workspace.state_dir.clone(),
        config.workspace.archive_dir(),
        summarizer,
        config.agent.compact_fraction,
        Duration::from_millis(config.consolidation.precompact_deadline_ms),
    );

    let extractor = Arc::new(Extractor::new(
        Arc::clone(&utility_provider),
        utility_profile.model.clone(),
        utility_profile.max_tokens,
        config.consolidation.max_extract_chars,
    ));
    let worker = Arc::new(
        ConsolidationWorker::new(Arc::clone(&memory), extractor)
            .with_log_dir(sessions.log_dir().to_path_buf()),
    );
    sessions.register_hook(worker);

    let state = Arc::new(AppState::new(
        config,
        providers,
        embedder,
        Arc::new(sessions),
        memory,
        costs,
    ));

    write_pid_file(&state)?;

    // Channel adapters.
    let config = state.config();
    if let Some(telegram_config) = config.channels.telegram.clone() {
        start_channel(
            &state,
            Arc::new(wisp_telegram::TelegramChannel::new(telegram_config)),
        );
    }
    if args.cli {
        start_channel(&state, Arc::new(cli::CliChannel));
    }

    // Control API.
    let router = http::build_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "wisp gateway listening");

    let serve_state = Arc::clone(&state);
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        serve_state.shutdown.cancelled().await;
    });

    tokio::spawn(handle_signals(Arc::clone(&state)));

    server.await?;

    // Graceful teardown: channels close their transports, PID goes away.
    for channel in state.channels.iter() {
        if let Err(e) = channel.value().disconnect().await {
            warn!(channel = channel.key(), error = %e, "disconnect failed");
        }
    }
    remove_pid_file(&state);
    info!("wisp gateway stopped");
    Ok(())
}

/// One provider instance per configured profile.
fn build_providers(config: &WispConfig) -> HashMap<String, Arc<dyn Provider>> {
    let mut out: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    for (name, profile) in &config.providers {
        let api_key = profile.api_key.clone().unwrap_or_default();
        let provider: Arc<dyn Provider> = match profile.api {
            ProviderApi::Anthropic => {
                Arc::new(AnthropicProvider::new(api_key, profile.base_url.clone()))
            }
            ProviderApi::OpenaiCompat => {
                Arc::new(OpenAiProvider::new(api_key, profile.base_url.clone()))
            }
        };
        out.insert(name.clone(), provider);
    }
    out
}

/// Spawn a channel adapter: its receive loop plus a forwarder that feeds the
/// orchestrator and reports backpressure.
fn start_channel(state: &Arc<AppState>, channel: Arc<dyn Channel>) {
    let name = channel.name().to_string();
    state.channels.insert(name.clone(), Arc::clone(&channel));

    let (tx, mut rx) = mpsc::channel(64);
    let forward_state = Arc::clone(state);
    let forward_name = name.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = orchestrator::submit(&forward_state, message) {
                warn!(channel = %forward_name, error = %e, "inbound message rejected");
            }
        }
    });

    let run_state = Arc::clone(state);
    tokio::spawn(async move {
        let shutdown = run_state.shutdown.clone();
        if let Err(e) = channel.run(tx, shutdown).await {
            error!(channel = %name, error = %e, "channel run failed");
        }
    });
}

/// SIGINT/SIGTERM stop the daemon; SIGHUP swaps in a freshly-loaded config.
async fn handle_signals(state: Arc<AppState>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("signal handler");
    let mut int = signal(SignalKind::interrupt()).expect("signal handler");
    let mut hup = signal(SignalKind::hangup()).expect("signal handler");

    loop {
        tokio::select! {
            _ = term.recv() => {
                info!("SIGTERM received, shutting down");
                state.shutdown.cancel();
                break;
            }
            _ = int.recv() => {
                info!("SIGINT received, shutting down");
                state.shutdown.cancel();
                break;
            }
            _ = hup.recv() => {
                match WispConfig::load(None) {
                    Ok(next) => {
                        state.replace_config(next);
                        info!("config reloaded");
                    }
                    Err(e) => warn!(error = %e, "config reload failed, keeping current"),
                }
            }
        }
    }
}

fn write_pid_file(state: &Arc<AppState>) -> std::io::Result<()> {
    let path = state.config().workspace.pid_path();
    std::fs::write(path, std::process::id().to_string())
}

fn remove_pid_file(state: &Arc<AppState>) {
    let path = state.config().workspace.pid_path();
    if let Err(e) = std::fs::remove_file(&path) {
        warn!(error = %e, path = %path.display(), "pid file removal failed");
    }
}
