use rusqlite::Connection;

use crate::error::Result;

/// Initialise the coordination schema in `conn`.
///
/// Creates the `kv` and `zsets` tables (idempotent) and an index on
/// `(zset, score)` so the peek-minimum query stays efficient with many
/// scheduled jobs.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key         TEXT    NOT NULL PRIMARY KEY,
            value       TEXT    NOT NULL,
            expires_at  INTEGER             -- epoch seconds, NULL = no expiry
        ) STRICT;

        CREATE TABLE IF NOT EXISTS zsets (
            zset    TEXT    NOT NULL,
            member  TEXT    NOT NULL,
            score   INTEGER NOT NULL,       -- epoch seconds
            PRIMARY KEY (zset, member)
        ) STRICT;

        -- Efficient peek: SELECT … WHERE zset = ? ORDER BY score LIMIT 1
        CREATE INDEX IF NOT EXISTS idx_zsets_score ON zsets (zset, score);
        ",
    )?;
    Ok(())
}
