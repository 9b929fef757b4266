//! Structured memory store: facts, episodes, commitments, aliases, and
//! consolidation bookkeeping.
//!
//! All SQL is parameterised — user and LLM strings never reach query text.
//! Fact values are prompt context only; nothing in this crate (or its
//! callers) builds paths, commands, or queries from them.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::{MemoryError, Result};
use crate::types::{Commitment, CommitmentStatus, Episode, Fact};

/// Thread-safe handle over the single memory database.
///
/// One writer discipline per table family: the daemon writes the structured
/// tables, the offline indexer writes `chunks`/`files`. A `Mutex<Connection>`
/// serialises writers within a process; readers share the same connection.
pub struct MemoryStore {
    pub(crate) db: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (and initialise) the memory database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        crate::db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        crate::db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // ── Entity aliases ──────────────────────────────────────────────────

    /// Insert an alias → canonical mapping. `INSERT OR IGNORE`: the first
    /// writer wins, re-runs are no-ops.
    pub fn insert_alias(&self, alias: &str, canonical: &str, confidence: f64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO entity_aliases (alias, canonical, confidence)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![alias, canonical, confidence],
        )?;
        Ok(())
    }

    /// Resolve a name to its canonical entity, or `None` when unknown.
    pub fn resolve_entity(&self, name: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        let canonical: Option<String> = db
            .query_row(
                "SELECT canonical FROM entity_aliases WHERE alias = ?1",
                rusqlite::params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(canonical)
    }

    /// Resolve through the alias table, falling back to the name itself
    /// (identity alias).
    fn canonicalize(&self, name: &str) -> Result<String> {
        Ok(self.resolve_entity(name)?.unwrap_or_else(|| name.to_string()))
    }

    // ── Facts ───────────────────────────────────────────────────────────

    /// Insert or update a fact. A differing existing value is soft-invalidated
    /// and a fresh row inserted, preserving the audit trail of what was once
    /// believed.
    #[instrument(skip(self, value), fields(entity, attribute))]
    pub fn write_fact(
        &self,
        entity: &str,
        attribute: &str,
        value: &str,
        confidence: f64,
        session: Option<&str>,
    ) -> Result<i64> {
        let canonical = self.canonicalize(entity)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();

        let existing: Option<(i64, String)> = db
            .query_row(
                "SELECT id, value FROM facts
                 WHERE entity = ?1 AND attribute = ?2 AND valid = 1
                 ORDER BY updated_ts DESC LIMIT 1",
                rusqlite::params![canonical, attribute],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, old_value)) if old_value == value => {
                db.execute(
                    "UPDATE facts SET confidence = ?1, updated_ts = ?2 WHERE id = ?3",
                    rusqlite::params![confidence, now, id],
                )?;
                Ok(id)
            }
            other => {
                if let Some((old_id, _)) = other {
                    debug!(old_id, "invalidating superseded fact");
                    db.execute(
                        "UPDATE facts SET valid = 0, updated_ts = ?1 WHERE id = ?2",
                        rusqlite::params![now, old_id],
                    )?;
                }
                db.execute(
                    "INSERT INTO facts
                     (entity, attribute, value, confidence, session, valid, created_ts, updated_ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                    rusqlite::params![canonical, attribute, value, confidence, session, now],
                )?;
                Ok(db.last_insert_rowid())
            }
        }
    }

    /// Soft-invalidate a fact by id.
    pub fn forget_fact(&self, id: i64) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE facts SET valid = 0, updated_ts = ?1 WHERE id = ?2 AND valid = 1",
            rusqlite::params![now, id],
        )?;
        if changed == 0 {
            return Err(MemoryError::FactNotFound { id });
        }
        Ok(())
    }

    /// Valid facts for an entity, optionally narrowed to one attribute.
    /// The name is alias-resolved before the lookup runs.
    #[instrument(skip(self))]
    pub fn lookup_facts(&self, entity: &str, attribute: Option<&str>) -> Result<Vec<Fact>> {
        let canonical = self.canonicalize(entity)?;
        let db = self.db.lock().unwrap();
        let mut out = Vec::new();
        match attribute {
            Some(attr) => {
                let mut stmt = db.prepare(
                    "SELECT id, entity, attribute, value, confidence, session, valid,
                            created_ts, updated_ts
                     FROM facts WHERE entity = ?1 AND attribute = ?2 AND valid = 1
                     ORDER BY updated_ts DESC",
                )?;
                let rows = stmt.query_map(rusqlite::params![canonical, attr], row_to_fact)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT id, entity, attribute, value, confidence, session, valid,
                            created_ts, updated_ts
                     FROM facts WHERE entity = ?1 AND valid = 1
                     ORDER BY attribute, updated_ts DESC",
                )?;
                let rows = stmt.query_map(rusqlite::params![canonical], row_to_fact)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    // ── Episodes ────────────────────────────────────────────────────────

    pub fn insert_episode(
        &self,
        title: &str,
        body: &str,
        started_at: &str,
        session: Option<&str>,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO episodes (title, body, started_at, session)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![title, body, started_at, session],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Substring search over episode titles and bodies, newest first.
    pub fn search_episodes(&self, query: &str, limit: usize) -> Result<Vec<Episode>> {
        let pattern = format!("%{}%", query.replace('%', "").replace('_', ""));
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, title, body, started_at, session FROM episodes
             WHERE title LIKE ?1 OR body LIKE ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![pattern, limit as i64], |row| {
            Ok(Episode {
                id: row.get(0)?,
                title: row.get(1)?,
                body: row.get(2)?,
                started_at: row.get(3)?,
                session: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ── Commitments ─────────────────────────────────────────────────────

    pub fn insert_commitment(&self, description: &str, due_ts: Option<&str>) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO commitments (description, status, due_ts, updated_ts)
             VALUES (?1, 'open', ?2, ?3)",
            rusqlite::params![description, due_ts, now],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn get_open_commitments(&self) -> Result<Vec<Commitment>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, description, status, due_ts, updated_ts FROM commitments
             WHERE status = 'open' ORDER BY due_ts IS NULL, due_ts",
        )?;
        let rows = stmt.query_map([], row_to_commitment)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn update_commitment(&self, id: i64, status: CommitmentStatus) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE commitments SET status = ?1, updated_ts = ?2 WHERE id = ?3",
            rusqlite::params![status.as_str(), now, id],
        )?;
        if changed == 0 {
            return Err(MemoryError::CommitmentNotFound { id });
        }
        Ok(())
    }

    // ── Consolidation bookkeeping ───────────────────────────────────────

    /// Has this session file, at this content hash, already been consolidated?
    pub fn is_consolidated(&self, session_file: &str, hash: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let stored: Option<String> = db
            .query_row(
                "SELECT hash FROM consolidation_file_hashes WHERE path = ?1",
                rusqlite::params![session_file],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.as_deref() == Some(hash))
    }

    /// Record a completed consolidation of `session_file` at `hash`.
    pub fn mark_consolidated(&self, session_file: &str, hash: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO consolidation_state (session_file, consolidated_ts)
             VALUES (?1, ?2)
             ON CONFLICT(session_file) DO UPDATE SET consolidated_ts = ?2",
            rusqlite::params![session_file, now],
        )?;
        db.execute(
            "INSERT INTO consolidation_file_hashes (path, hash) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET hash = ?2",
            rusqlite::params![session_file, hash],
        )?;
        Ok(())
    }
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    Ok(Fact {
        id: row.get(0)?,
        entity: row.get(1)?,
        attribute: row.get(2)?,
        value: row.get(3)?,
        confidence: row.get(4)?,
        session: row.get(5)?,
        valid: row.get::<_, i64>(6)? != 0,
        created_ts: row.get(7)?,
        updated_ts: row.get(8)?,
    })
}

fn row_to_commitment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Commitment> {
    let status_str: String = row.get(2)?;
    Ok(Commitment {
        id: row.get(0)?,
        description: row.get(1)?,
        status: status_str.parse().unwrap_or(CommitmentStatus::Open),
        due_ts: row.get(3)?,
        updated_ts: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_resolution_applies_at_lookup() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .insert_alias("Nicolas Forstinger", "nicolas_forstinger", 0.9)
            .unwrap();
        store
            .write_fact("nicolas_forstinger", "nationality", "austrian", 0.9, None)
            .unwrap();

        let facts = store
            .lookup_facts("Nicolas Forstinger", Some("nationality"))
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].entity, "nicolas_forstinger");
        assert_eq!(facts[0].value, "austrian");
    }

    #[test]
    fn write_fact_invalidates_superseded_value() {
        let store = MemoryStore::open_in_memory().unwrap();
        let first = store
            .write_fact("ada", "favorite_color", "blue", 0.8, None)
            .unwrap();
        let second = store
            .write_fact("ada", "favorite_color", "green", 0.9, None)
            .unwrap();
        assert_ne!(first, second);

        let facts = store.lookup_facts("ada", Some("favorite_color")).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "green");
    }

    #[test]
    fn same_value_updates_in_place() {
        let store = MemoryStore::open_in_memory().unwrap();
        let first = store.write_fact("ada", "language", "rust", 0.5, None).unwrap();
        let second = store.write_fact("ada", "language", "rust", 0.9, None).unwrap();
        assert_eq!(first, second);
        let facts = store.lookup_facts("ada", Some("language")).unwrap();
        assert_eq!(facts.len(), 1);
        assert!((facts[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn forget_soft_invalidates() {
        let store = MemoryStore::open_in_memory().unwrap();
        let id = store.write_fact("ada", "pet", "cat", 0.8, None).unwrap();
        store.forget_fact(id).unwrap();
        assert!(store.lookup_facts("ada", Some("pet")).unwrap().is_empty());
        // Forgetting twice is an error — already invalid.
        assert!(store.forget_fact(id).is_err());
    }

    #[test]
    fn commitment_lifecycle() {
        let store = MemoryStore::open_in_memory().unwrap();
        let id = store
            .insert_commitment("call the dentist", Some("2026-08-03T09:00:00Z"))
            .unwrap();
        assert_eq!(store.get_open_commitments().unwrap().len(), 1);
        store.update_commitment(id, CommitmentStatus::Done).unwrap();
        assert!(store.get_open_commitments().unwrap().is_empty());
        assert!(store
            .update_commitment(9999, CommitmentStatus::Done)
            .is_err());
    }

    #[test]
    fn consolidation_short_circuits_unchanged_inputs() {
        let store = MemoryStore::open_in_memory().unwrap();
        assert!(!store.is_consolidated("u1.2026-08-01.jsonl", "abc").unwrap());
        store.mark_consolidated("u1.2026-08-01.jsonl", "abc").unwrap();
        assert!(store.is_consolidated("u1.2026-08-01.jsonl", "abc").unwrap());
        // Changed content — must be reprocessed.
        assert!(!store.is_consolidated("u1.2026-08-01.jsonl", "def").unwrap());
        store.mark_consolidated("u1.2026-08-01.jsonl", "def").unwrap();
        assert!(store.is_consolidated("u1.2026-08-01.jsonl", "def").unwrap());
    }

    #[test]
    fn episode_search_matches_body() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .insert_episode(
                "Trip planning",
                "Discussed flights to Vienna in October",
                "2026-07-30T10:00:00Z",
                Some("u1"),
            )
            .unwrap();
        let hits = store.search_episodes("Vienna", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.search_episodes("Tokyo", 10).unwrap().is_empty());
    }
}
