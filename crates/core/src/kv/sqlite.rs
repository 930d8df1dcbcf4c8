use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{KeyValueStore, KvError};

/// SQLite-backed KV store.
///
/// Shares the database file with the other stores so several worker
/// processes on one host coordinate through it. Expiry is stored as Unix
/// milliseconds and checked on every read.
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    pub fn new(path: &Path) -> Result<Self, KvError> {
        let conn = Connection::open(path).map_err(|e| KvError::Backend(e.to_string()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, KvError> {
        let conn = Connection::open_in_memory().map_err(|e| KvError::Backend(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, KvError> {
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv_entries(expires_at);
            "#,
        )
        .map_err(|e| KvError::Backend(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, KvError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, i64) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| KvError::Backend("connection mutex poisoned".to_string()))?;
            f(&conn, now_millis()).map_err(|e| KvError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    /// Remove expired rows. Returns how many were deleted.
    pub async fn purge_expired(&self) -> Result<usize, KvError> {
        self.with_conn(|conn, now| {
            conn.execute("DELETE FROM kv_entries WHERE expires_at <= ?", params![now])
        })
        .await
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let key = key.to_string();
        self.with_conn(move |conn, now| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ? AND expires_at > ?",
                params![key, now],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn, now| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, now.saturating_add(ttl_millis(ttl))],
            )
            .map(|_| ())
        })
        .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn, now| {
            // An expired row counts as absent and is taken over in place.
            let changed = conn.execute(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
                 WHERE kv_entries.expires_at <= ?4",
                params![key, value, now.saturating_add(ttl_millis(ttl)), now],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let key = key.to_string();
        self.with_conn(move |conn, now| {
            let live = conn.execute(
                "DELETE FROM kv_entries WHERE key = ? AND expires_at > ?",
                params![key, now],
            )?;
            conn.execute("DELETE FROM kv_entries WHERE key = ?", params![key])?;
            Ok(live == 1)
        })
        .await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let key = key.to_string();
        let expected = expected.to_string();
        self.with_conn(move |conn, now| {
            let deleted = conn.execute(
                "DELETE FROM kv_entries WHERE key = ? AND value = ? AND expires_at > ?",
                params![key, expected, now],
            )?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn extend_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let key = key.to_string();
        let expected = expected.to_string();
        self.with_conn(move |conn, now| {
            let updated = conn.execute(
                "UPDATE kv_entries SET expires_at = ?1
                 WHERE key = ?2 AND value = ?3 AND expires_at > ?4",
                params![now.saturating_add(ttl_millis(ttl)), key, expected, now],
            )?;
            Ok(updated == 1)
        })
        .await
    }
}
