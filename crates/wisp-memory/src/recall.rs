//! Unstructured recall over the indexed workspace.
//!
//! The chunk index has a strict ownership split: the offline indexer process
//! writes `files`/`chunks`/`chunks_fts` (the `index_*` functions below); the
//! daemon only ever queries. Query-side recall runs full-text and vector
//! scoring, merges with a deterministic weighted sum, applies time decay, and
//! renders a bounded text block.

use rusqlite::OptionalExtension;
use tracing::{debug, instrument};

use crate::error::{MemoryError, Result};
use crate::manager::MemoryStore;
use crate::types::RecallHit;

/// Relative weight of the full-text score in the merged ranking.
const FTS_WEIGHT: f64 = 0.4;
/// Relative weight of the cosine score in the merged ranking.
const VECTOR_WEIGHT: f64 = 0.6;
/// Half-life of the freshness decay, in days. Newer chunks win ties.
const DECAY_HALF_LIFE_DAYS: f64 = 30.0;
/// Candidates fetched from each ranking before the merge.
const CANDIDATES_PER_SIDE: usize = 32;
/// Hits below this merged score are dropped rather than padded in.
const SCORE_FLOOR: f64 = 0.05;
/// Maximum characters of chunk text rendered per hit.
const SNIPPET_CHARS: usize = 700;

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for zero-magnitude inputs. Length mismatch is a hard error at
/// the call sites that pair texts with vectors; here it means a corrupt blob
/// and scores 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Encode an embedding as a little-endian f32 blob for storage.
pub fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Decode a stored embedding blob. A length not divisible by four means the
/// row was corrupted — surfaced, never silently truncated.
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(MemoryError::MalformedEmbedding { len: blob.len() });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Freshness multiplier: exponential decay with a 30-day half-life.
fn time_decay(updated_ts: &str, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let age_days = chrono::DateTime::parse_from_rfc3339(updated_ts)
        .map(|ts| (now - ts.with_timezone(&chrono::Utc)).num_seconds() as f64 / 86_400.0)
        .unwrap_or(DECAY_HALF_LIFE_DAYS);
    0.5f64.powf(age_days.max(0.0) / DECAY_HALF_LIFE_DAYS)
}

/// Reduce a free-text query to an FTS5 MATCH expression: bare terms, each
/// quoted, OR-joined. Quoting keeps user punctuation out of the FTS syntax.
fn fts_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

impl MemoryStore {
    /// Retrieve the top-`k` chunks for a query, merging full-text rank and
    /// cosine similarity, and render them as a bounded text block.
    ///
    /// `query_embedding` is computed by the caller (the daemon owns the
    /// embedding client); pass `None` to fall back to full-text only.
    #[instrument(skip(self, query_embedding), fields(k))]
    pub fn recall(&self, query: &str, query_embedding: Option<&[f32]>, k: usize) -> Result<String> {
        let now = chrono::Utc::now();
        let mut hits: Vec<RecallHit> = Vec::new();

        // Full-text side. bm25() orders the candidates; the merged score uses
        // the reciprocal rank rather than the raw bm25 magnitude, which
        // collapses toward zero on small corpora and would starve this side.
        if let Some(expr) = fts_match_expr(query) {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT c.path, c.chunk_ix, c.text, c.updated_ts
                 FROM chunks_fts
                 JOIN chunks c ON c.id = chunks_fts.rowid
                 WHERE chunks_fts MATCH ?1
                 ORDER BY bm25(chunks_fts)
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![expr, CANDIDATES_PER_SIDE as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )?;
            for (rank, row) in rows.enumerate() {
                let (path, chunk_ix, text, updated_ts) = row?;
                let fts_score = 1.0 / (1.0 + rank as f64);
                hits.push(RecallHit {
                    path,
                    chunk_ix,
                    text,
                    score: FTS_WEIGHT * fts_score * time_decay(&updated_ts, now),
                });
            }
        }

        // Vector side: scan every embedded chunk. The index is workspace-
        // sized (thousands of chunks), so a linear cosine pass is fine.
        if let Some(qvec) = query_embedding {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT path, chunk_ix, text, updated_ts, embedding
                 FROM chunks WHERE embedding IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?;
            let mut scored: Vec<RecallHit> = Vec::new();
            for row in rows {
                let (path, chunk_ix, text, updated_ts, blob) = row?;
                let embedding = decode_embedding(&blob)?;
                let cos = cosine_similarity(qvec, &embedding) as f64;
                if cos <= 0.0 {
                    continue;
                }
                scored.push(RecallHit {
                    path,
                    chunk_ix,
                    text,
                    score: VECTOR_WEIGHT * cos * time_decay(&updated_ts, now),
                });
            }
            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(CANDIDATES_PER_SIDE);
            hits.extend(scored);
        }

        // Merge duplicates (same chunk found by both sides) by summing.
        hits.sort_by(|a, b| (a.path.as_str(), a.chunk_ix).cmp(&(b.path.as_str(), b.chunk_ix)));
        let mut merged: Vec<RecallHit> = Vec::new();
        for hit in hits {
            match merged.last_mut() {
                Some(last) if last.path == hit.path && last.chunk_ix == hit.chunk_ix => {
                    last.score += hit.score;
                }
                _ => merged.push(hit),
            }
        }
        merged.sort_by(|a, b| b.score.total_cmp(&a.score));

        let total = merged.len();
        let kept: Vec<RecallHit> = merged
            .into_iter()
            .filter(|h| h.score >= SCORE_FLOOR)
            .take(k)
            .collect();
        let dropped = total - kept.len();

        debug!(total, kept = kept.len(), dropped, "recall complete");
        Ok(render_block(&kept, dropped))
    }
}

/// Render recall hits as the text block handed to the context builder.
/// The footer lines are load-bearing: downstream synthesis preserves them so
/// the model can see what it is (and is not) working from.
fn render_block(hits: &[RecallHit], dropped: usize) -> String {
    if hits.is_empty() {
        return format!("[Memory loaded: none] [Dropped: {}]", dropped);
    }
    let mut out = String::new();
    for hit in hits {
        let snippet: String = hit.text.chars().take(SNIPPET_CHARS).collect();
        out.push_str(&format!("--- {}#{}\n{}\n", hit.path, hit.chunk_ix, snippet));
    }
    let names: Vec<String> = hits
        .iter()
        .map(|h| format!("{}#{}", h.path, h.chunk_ix))
        .collect();
    out.push_str(&format!(
        "[Memory loaded: {}] [Dropped: {}]",
        names.join(", "),
        dropped
    ));
    out
}

// ── Index write path — offline indexer only ─────────────────────────────

impl MemoryStore {
    /// Content hash stored for a file, if it was ever indexed.
    pub fn indexed_file_hash(&self, path: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        let hash: Option<String> = db
            .query_row(
                "SELECT hash FROM files WHERE path = ?1",
                rusqlite::params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Replace a file's chunks with a freshly-chunked, freshly-embedded set.
    ///
    /// `texts` and `embeddings` must pair one-to-one; unequal lengths are a
    /// hard error because silent truncation would mis-score every later
    /// similarity query.
    pub fn index_file(
        &self,
        path: &str,
        hash: &str,
        texts: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        if texts.len() != embeddings.len() {
            return Err(MemoryError::EmbeddingMismatch {
                texts: texts.len(),
                vectors: embeddings.len(),
            });
        }
        let now = chrono::Utc::now().to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        // Drop the old chunk set (and its FTS shadow rows) before reinserting.
        {
            let mut old = tx.prepare("SELECT id, text FROM chunks WHERE path = ?1")?;
            let rows = old.query_map(rusqlite::params![path], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, text) = row?;
                tx.execute(
                    "INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES('delete', ?1, ?2)",
                    rusqlite::params![id, text],
                )?;
            }
        }
        tx.execute("DELETE FROM chunks WHERE path = ?1", rusqlite::params![path])?;

        for (ix, (text, embedding)) in texts.iter().zip(embeddings.iter()).enumerate() {
            tx.execute(
                "INSERT INTO chunks (path, chunk_ix, text, embedding, updated_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![path, ix as i64, text, encode_embedding(embedding), now],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO chunks_fts(rowid, text) VALUES (?1, ?2)",
                rusqlite::params![id, text],
            )?;
        }

        tx.execute(
            "INSERT INTO files (path, hash, updated_ts) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET hash = ?2, updated_ts = ?3",
            rusqlite::params![path, hash, now],
        )?;
        tx.commit()?;
        Ok(())
    }
}
