use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Non-fatal: in-memory and fresh databases legitimately fail this.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS patterns (
            id         TEXT PRIMARY KEY,
            w          REAL NOT NULL,
            x          REAL NOT NULL,
            y          REAL NOT NULL,
            z          REAL NOT NULL,
            frequency  REAL NOT NULL,
            amplitude  REAL NOT NULL,
            phase      REAL NOT NULL,
            depth      INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pattern_sources (
            pattern_id TEXT NOT NULL REFERENCES patterns(id) ON DELETE CASCADE,
            position   INTEGER NOT NULL,
            source_id  TEXT NOT NULL,
            PRIMARY KEY (pattern_id, position)
        );
        ",
    )?;

    if let Some(found) = get_schema_version(conn)? {
        if found > SCHEMA_VERSION {
            return Err(StoreError::Persistence(format!(
                "database schema version {found} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
    }

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}
