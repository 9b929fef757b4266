//! wisp-indexer — offline workspace indexing job.
//!
//! Separate process from the daemon: this is the only writer of the chunk
//! index. Run it from cron or a systemd timer.

use std::sync::Arc;

use clap::Parser;

use wisp_agent::embed::OpenAiEmbeddings;
use wisp_consolidate::Indexer;
use wisp_memory::MemoryStore;

#[derive(Parser)]
#[command(name = "wisp-indexer", about = "Index the wisp workspace for recall")]
struct Args {
    /// Path to wisp.toml (defaults to ~/.wisp/wisp.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wisp_indexer=info,wisp_consolidate=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = wisp_core::WispConfig::load(args.config.as_deref())?;

    let api_key = config
        .embedding
        .api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.api_key is required for indexing"))?;
    let embedder = Arc::new(OpenAiEmbeddings::new(
        api_key,
        config.embedding.base_url.clone(),
        config.embedding.model.clone(),
    ));

    let store = Arc::new(MemoryStore::open(&config.workspace.memory_db_path())?);
    let indexer = Indexer::new(store, embedder);
    let report = indexer.run(&config.workspace.path).await?;

    println!(
        "scanned {}, indexed {}, unchanged {}",
        report.scanned, report.indexed, report.skipped_unchanged
    );
    Ok(())
}
