//! SQL DDL for the vector index database.
//!
//! The index is a derived cache over the memory log: one row per indexed
//! entry with its embedding and the attributes searches filter on. All DDL
//! uses `IF NOT EXISTS` so initialization is idempotent.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- One row per indexed memory entry; id matches the log entry id
CREATE TABLE IF NOT EXISTS index_entries (
    id INTEGER PRIMARY KEY,
    type TEXT NOT NULL CHECK(type IN ('episodic','semantic','procedural','reflection','conversation')),
    importance REAL NOT NULL CHECK(importance >= 0.0 AND importance <= 1.0),
    created_at INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    consolidated INTEGER NOT NULL DEFAULT 0,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed INTEGER,
    embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_index_entries_type ON index_entries(type);
CREATE INDEX IF NOT EXISTS idx_index_entries_importance ON index_entries(importance);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
