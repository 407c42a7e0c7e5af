//! Schema migrations, applied in order on open.

use rusqlite::Connection;

use super::StoreError;

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS posts (
            id                 TEXT PRIMARY KEY,
            title              TEXT NOT NULL,
            url                TEXT NOT NULL,
            score              INTEGER NOT NULL DEFAULT 0,
            created_at         INTEGER NOT NULL,
            author             TEXT NOT NULL DEFAULT '',
            image_url          TEXT,
            extracted_name     TEXT,
            extracted_headline TEXT,
            hidden             INTEGER NOT NULL DEFAULT 0,
            synced_at          INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_posts_score ON posts (score DESC);
        CREATE INDEX IF NOT EXISTS idx_posts_pending
            ON posts (score DESC) WHERE extracted_name IS NULL AND image_url IS NOT NULL;",
    ),
    (
        2,
        "CREATE TABLE IF NOT EXISTS sync_runs (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            trigger      TEXT NOT NULL,
            started_at   INTEGER NOT NULL,
            payload      TEXT NOT NULL
        );",
    ),
    (
        3,
        "CREATE TABLE IF NOT EXISTS sync_cursors (
            key   TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );",
    ),
];

/// Apply every migration newer than the stored `user_version`.
pub fn run_all(conn: &Connection) -> Result<(), StoreError> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        conn.execute_batch(sql).map_err(|e| StoreError::Migration {
            version: *version,
            reason: e.to_string(),
        })?;
        conn.pragma_update(None, "user_version", version)?;
        tracing::debug!(target: "store", version, "migration applied");
    }
    Ok(())
}
