//! Append-only cost ledger — one row per provider call.
//!
//! Lives in its own database file so the memory store can be copied or
//! rebuilt without touching accounting history.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct CostRecord {
    pub ts: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_tokens: u64,
    pub dollars: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub day: String,
    pub model: String,
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub dollars: f64,
}

pub struct CostStore {
    db: Mutex<Connection>,
}

impl CostStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS costs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                ts            TEXT NOT NULL,
                model         TEXT NOT NULL,
                input_tokens  INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cache_tokens  INTEGER NOT NULL DEFAULT 0,
                dollars       REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_costs_ts ON costs(ts);",
        )?;
        Ok(())
    }

    pub fn record(&self, rec: &CostRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO costs (ts, model, input_tokens, output_tokens, cache_tokens, dollars)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                rec.ts,
                rec.model,
                rec.input_tokens as i64,
                rec.output_tokens as i64,
                rec.cache_tokens as i64,
                rec.dollars
            ],
        )?;
        Ok(())
    }

    /// Per-day, per-model aggregates, newest day first.
    pub fn summary(&self, days: u32) -> Result<Vec<CostSummary>> {
        let since = (chrono::Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT substr(ts, 1, 10) AS day, model, COUNT(*),
                    SUM(input_tokens), SUM(output_tokens), SUM(dollars)
             FROM costs WHERE ts >= ?1
             GROUP BY day, model
             ORDER BY day DESC, model",
        )?;
        let rows = stmt.query_map(rusqlite::params![since], |row| {
            Ok(CostSummary {
                day: row.get(0)?,
                model: row.get(1)?,
                calls: row.get::<_, i64>(2)? as u64,
                input_tokens: row.get::<_, i64>(3)? as u64,
                output_tokens: row.get::<_, i64>(4)? as u64,
                dollars: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Total dollars spent since `since_ts` (RFC3339).
    pub fn total_since(&self, since_ts: &str) -> Result<f64> {
        let db = self.db.lock().unwrap();
        let total: f64 = db.query_row(
            "SELECT COALESCE(SUM(dollars), 0) FROM costs WHERE ts >= ?1",
            rusqlite::params![since_ts],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_summarise() {
        let store = CostStore::open_in_memory().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        for _ in 0..3 {
            store
                .record(&CostRecord {
                    ts: now.clone(),
                    model: "claude-sonnet-4-6".to_string(),
                    input_tokens: 1000,
                    output_tokens: 200,
                    cache_tokens: 0,
                    dollars: 0.006,
                })
                .unwrap();
        }
        let summary = store.summary(7).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].calls, 3);
        assert_eq!(summary[0].input_tokens, 3000);
        assert!((summary[0].dollars - 0.018).abs() < 1e-9);

        let epoch = "1970-01-01T00:00:00Z";
        assert!(store.total_since(epoch).unwrap() > 0.0);
    }
}
