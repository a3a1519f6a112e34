//! SQLite-backed TTL cache for analysis reports.
//!
//! One table keyed by report key, JSON payloads, millisecond expiry so
//! tests with sub-second TTLs behave deterministically. The database file
//! is an internal detail of this module.

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Thread-safe cache handle.
pub struct Cache {
    conn: Mutex<Connection>,
}

/// Aggregate numbers for the CLI cache command.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub payload_bytes: u64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Cache {
    /// Open or create the cache database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fetch and decode an entry. Expired entries are deleted on read and
    /// reported as `CacheExpired`; absent keys as `CacheMiss`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT payload, expires_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (payload, expires_at) = row.ok_or(Error::CacheMiss)?;

        if expires_at <= now_millis() {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            tracing::debug!(key, "cache entry expired");
            return Err(Error::CacheExpired);
        }

        Ok(serde_json::from_str(&payload)?)
    }

    /// Store a value with the given TTL, replacing any previous entry.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let created_at = now_millis();
        let expires_at = created_at + ttl.as_millis() as i64;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, payload, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, payload, created_at, expires_at],
        )?;

        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Remove every entry whose expiry is in the past. Returns the number
    /// of entries removed.
    pub fn sweep(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at < ?1",
            params![now_millis()],
        )?;
        if removed > 0 {
            tracing::info!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }

    /// Remove every entry regardless of expiry.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM cache_entries", [])?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn.lock().unwrap();
        let (entries, payload_bytes): (u64, u64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) FROM cache_entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(CacheStats {
            entries,
            payload_bytes,
        })
    }

    /// Close the cache, flushing the underlying connection.
    pub fn close(self) {
        // Dropping the connection closes it; an error here leaves the file
        // valid, so it is only logged.
        let conn = self.conn.into_inner().unwrap();
        if let Err((_conn, e)) = conn.close() {
            tracing::warn!("failed to close cache cleanly: {}", e);
        }
    }
}
