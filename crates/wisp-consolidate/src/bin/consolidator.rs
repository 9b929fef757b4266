//! wisp-consolidator — offline consolidation job.
//!
//! Walks unconsolidated session logs (live and archived) and extracts facts,
//! episodes, commitments, and aliases into the structured store. Safe to
//! re-run: unchanged inputs short-circuit on their content hash.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use wisp_agent::anthropic::AnthropicProvider;
use wisp_agent::openai::OpenAiProvider;
use wisp_agent::Provider;
use wisp_consolidate::{ConsolidationWorker, Extractor};
use wisp_core::config::ProviderApi;
use wisp_memory::MemoryStore;

#[derive(Parser)]
#[command(name = "wisp-consolidator", about = "Extract structured memory from session logs")]
struct Args {
    /// Path to wisp.toml (defaults to ~/.wisp/wisp.toml).
    #[arg(long)]
    config: Option<String>,
    /// Also sweep the archive directory.
    #[arg(long)]
    include_archive: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wisp_consolidator=info,wisp_consolidate=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = wisp_core::WispConfig::load(args.config.as_deref())?;
    let profile = config.utility_profile()?.clone();

    let provider: Arc<dyn Provider> = match profile.api {
        ProviderApi::Anthropic => Arc::new(AnthropicProvider::new(
            profile.api_key.clone().unwrap_or_default(),
            profile.base_url.clone(),
        )),
        ProviderApi::OpenaiCompat => Arc::new(OpenAiProvider::new(
            profile.api_key.clone().unwrap_or_default(),
            profile.base_url.clone(),
        )),
    };

    let store = Arc::new(MemoryStore::open(&config.workspace.memory_db_path())?);
    let extractor = Arc::new(Extractor::new(
        provider,
        profile.model.clone(),
        profile.max_tokens,
        config.consolidation.max_extract_chars,
    ));
    let worker = ConsolidationWorker::new(store, extractor);

    let cancel = CancellationToken::new();
    let log_dir = config.workspace.state_dir.join("logs");
    let mut processed = worker.run_over_dir(&log_dir, &cancel).await?;
    if args.include_archive {
        processed += worker
            .run_over_dir(&config.workspace.archive_dir(), &cancel)
            .await?;
    }

    println!("consolidated {processed} session log(s)");
    Ok(())
}
