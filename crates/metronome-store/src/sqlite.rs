use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use metronome_core::Clock;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::store::CoordinationStore;

/// How long a writer waits on a locked database file before erroring.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-file coordination store.
///
/// Lets several processes on one host share a coordination namespace through
/// a database file. Each process opens its own connection; SQLite's file
/// locking makes every statement atomic, and the busy timeout turns
/// cross-process write contention into a short wait instead of an error.
///
/// Thread-safe: wraps the connection in a `Mutex` (single-node Mutex over a
/// pooled setup, same trade-off the rest of the workspace makes).
pub struct SqliteStore {
    clock: Arc<dyn Clock>,
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path` and initialise the schema.
    pub fn open<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_db(&conn)?;
        debug!(path = %path.as_ref().display(), "sqlite coordination store opened");
        Ok(Self {
            clock,
            db: Mutex::new(conn),
        })
    }

    /// In-memory variant for tests; every call opens an isolated database.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            clock,
            db: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection mutex poisoned".into()))
    }
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.epoch_secs();
        let db = self.lock()?;
        let row: Option<(String, Option<i64>)> = db
            .query_row(
                "SELECT value, expires_at FROM kv WHERE key = ?1",
                rusqlite::params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((_, Some(at))) if at <= now => {
                db.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, NULL)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = NULL",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.epoch_secs();
        let expires_at = now + ttl.as_secs() as i64;
        let db = self.lock()?;
        // Lazily purge an expired row so INSERT OR IGNORE sees it as absent.
        db.execute(
            "DELETE FROM kv WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            rusqlite::params![key, now],
        )?;
        let inserted = db.execute(
            "INSERT OR IGNORE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, expires_at],
        )?;
        Ok(inserted == 1)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool> {
        let now = self.clock.epoch_secs();
        let db = self.lock()?;
        // Single UPDATE = atomic read-compare-write. The swapped value drops
        // its store TTL, matching the trait contract.
        let swapped = db.execute(
            "UPDATE kv SET value = ?1, expires_at = NULL
             WHERE key = ?2 AND value = ?3
               AND (expires_at IS NULL OR expires_at > ?4)",
            rusqlite::params![new, key, expected, now],
        )?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = self.lock()?;
        db.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            "INSERT INTO zsets (zset, member, score) VALUES (?1, ?2, ?3)
             ON CONFLICT(zset, member) DO UPDATE SET score = excluded.score",
            rusqlite::params![set, member, score],
        )?;
        Ok(())
    }

    async fn zpeek_min(&self, set: &str) -> Result<Option<(String, i64)>> {
        let db = self.lock()?;
        let row = db
            .query_row(
                "SELECT member, score FROM zsets
                 WHERE zset = ?1
                 ORDER BY score ASC, member ASC
                 LIMIT 1",
                rusqlite::params![set],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    async fn zremove(&self, set: &str, member: &str) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            "DELETE FROM zsets WHERE zset = ?1 AND member = ?2",
            rusqlite::params![set, member],
        )?;
        Ok(())
    }
}
