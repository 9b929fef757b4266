use rusqlite::{Connection, Result};

/// Initialise all memory tables. Safe to call on every startup (idempotent).
///
/// One database file carries both stores: the unstructured chunk index
/// (written only by the offline indexer) and the structured tables (written
/// by consolidation and the memory tools).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_chunk_tables(conn)?;
    create_structured_tables(conn)?;
    create_consolidation_tables(conn)?;
    Ok(())
}

fn create_chunk_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            path        TEXT PRIMARY KEY,
            hash        TEXT NOT NULL,
            updated_ts  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS chunks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            path        TEXT NOT NULL,
            chunk_ix    INTEGER NOT NULL,
            text        TEXT NOT NULL,
            embedding   BLOB,
            updated_ts  TEXT NOT NULL,
            UNIQUE(path, chunk_ix)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);",
    )?;
    // FTS5 external-content table — synced manually on every chunk write.
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
            USING fts5(text, content='chunks', content_rowid='id');",
    )
}

fn create_structured_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS facts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            entity      TEXT NOT NULL,
            attribute   TEXT NOT NULL,
            value       TEXT NOT NULL,
            confidence  REAL NOT NULL DEFAULT 0.8,
            session     TEXT,
            valid       INTEGER NOT NULL DEFAULT 1,
            created_ts  TEXT NOT NULL,
            updated_ts  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_facts_entity
            ON facts(entity, attribute, valid);

        CREATE TABLE IF NOT EXISTS episodes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT NOT NULL,
            body        TEXT NOT NULL,
            started_at  TEXT NOT NULL,
            session     TEXT
        );

        CREATE TABLE IF NOT EXISTS commitments (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'open',
            due_ts      TEXT,
            updated_ts  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_commitments_status
            ON commitments(status);

        CREATE TABLE IF NOT EXISTS entity_aliases (
            alias       TEXT PRIMARY KEY,
            canonical   TEXT NOT NULL,
            confidence  REAL NOT NULL DEFAULT 0.8
        );
        CREATE INDEX IF NOT EXISTS idx_aliases_canonical
            ON entity_aliases(canonical);",
    )
}

fn create_consolidation_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS consolidation_state (
            session_file    TEXT PRIMARY KEY,
            consolidated_ts TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS consolidation_file_hashes (
            path  TEXT PRIMARY KEY,
            hash  TEXT NOT NULL
        );",
    )
}
