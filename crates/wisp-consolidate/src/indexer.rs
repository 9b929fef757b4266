//! Workspace indexer — the offline producer of the unstructured chunk index.
//!
//! Runs as its own process (`wisp-indexer`); the daemon only reads what this
//! writes. Walks the workspace, hashes each text file, and re-chunks and
//! re-embeds only the files whose content changed.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use wisp_agent::embed::EmbeddingProvider;
use wisp_memory::MemoryStore;

use crate::content_hash;
use crate::error::{ConsolidateError, Result};

/// Target chunk size in characters. Chunks split on paragraph boundaries
/// where possible.
const CHUNK_CHARS: usize = 1_600;
/// Files larger than this are skipped — they are not prose worth recalling.
const MAX_FILE_BYTES: u64 = 512 * 1024;
/// Embedding batch size per provider call.
const EMBED_BATCH: usize = 32;

const INDEXED_EXTENSIONS: &[&str] = &["md", "txt", "org", "rst"];

pub struct Indexer {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

#[derive(Debug, Default)]
pub struct IndexReport {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped_unchanged: usize,
}

impl Indexer {
    pub fn new(store: Arc<MemoryStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Walk the workspace and bring the chunk index up to date.
    pub async fn run(&self, workspace: &Path) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        for entry in WalkDir::new(workspace)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let indexable = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| INDEXED_EXTENSIONS.contains(&ext));
            if !indexable {
                continue;
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_FILE_BYTES {
                debug!(path = %path.display(), "file too large, skipping");
                continue;
            }
            report.scanned += 1;

            let rel = path
                .strip_prefix(workspace)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable, skipping");
                    continue;
                }
            };
            let hash = content_hash(&bytes);
            if self.store.indexed_file_hash(&rel)?.as_deref() == Some(hash.as_str()) {
                report.skipped_unchanged += 1;
                continue;
            }

            let text = String::from_utf8_lossy(&bytes);
            let chunks = chunk_text(&text);
            if chunks.is_empty() {
                continue;
            }

            let embeddings = self.embed_all(&chunks).await?;
            self.store.index_file(&rel, &hash, &chunks, &embeddings)?;
            info!(path = %rel, chunks = chunks.len(), "indexed");
            report.indexed += 1;
        }

        info!(
            scanned = report.scanned,
            indexed = report.indexed,
            unchanged = report.skipped_unchanged,
            "index run complete"
        );
        Ok(report)
    }

    /// Embed chunks in batches, enforcing the one-vector-per-text pairing.
    async fn embed_all(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH) {
            let vectors = self
                .embedder
                .embed(batch)
                .await
                .map_err(|e| ConsolidateError::Embedding(e.to_string()))?;
            if vectors.len() != batch.len() {
                return Err(ConsolidateError::Embedding(format!(
                    "batch of {} texts yielded {} vectors",
                    batch.len(),
                    vectors.len()
                )));
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Split text into chunks of roughly `CHUNK_CHARS`, preferring paragraph
/// boundaries so a chunk stays a coherent unit.
pub fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim_end();
        if paragraph.trim().is_empty() {
            continue;
        }
        if !current.is_empty() && current.chars().count() + paragraph.chars().count() > CHUNK_CHARS
        {
            chunks.push(std::mem::take(&mut current));
        }
        // A single oversized paragraph is split hard.
        if paragraph.chars().count() > CHUNK_CHARS {
            let mut buf = String::new();
            for c in paragraph.chars() {
                buf.push(c);
                if buf.chars().count() >= CHUNK_CHARS {
                    chunks.push(std::mem::take(&mut buf));
                }
            }
            if !buf.is_empty() {
                current = buf;
            }
            continue;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wisp_agent::ProviderError;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn chunking_respects_paragraphs() {
        let text = "para one\n\npara two\n\npara three";
        let chunks = chunk_text(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("para one"));

        let long = format!("{}\n\n{}", "a".repeat(1500), "b".repeat(1500));
        let chunks = chunk_text(&long);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn oversized_paragraph_is_hard_split() {
        let text = "x".repeat(5000);
        let chunks = chunk_text(&text);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= CHUNK_CHARS));
    }

    #[tokio::test]
    async fn incremental_run_skips_unchanged_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "some interesting notes").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let indexer = Indexer::new(Arc::clone(&store), Arc::new(UnitEmbedder));

        let first = indexer.run(dir.path()).await.unwrap();
        assert_eq!(first.scanned, 1);
        assert_eq!(first.indexed, 1);

        let second = indexer.run(dir.path()).await.unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(second.skipped_unchanged, 1);

        std::fs::write(dir.path().join("notes.md"), "now with new content").unwrap();
        let third = indexer.run(dir.path()).await.unwrap();
        assert_eq!(third.indexed, 1);
    }
}
