//! Key-value cache and lock store used for dedup and monitoring snapshots.

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("KV backend error: {0}")]
    Backend(String),
}

/// A TTL-aware key-value store with an atomic set-if-absent.
///
/// Expired entries behave exactly like missing ones.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a live value.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Write a value only when no live value exists. Returns true when written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, KvError>;

    /// Remove a key. Returns true when a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Remove a key only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    /// Push the expiry of a live key to `now + ttl`, only while it still
    /// holds `expected`. Returns false when the key expired or changed hands.
    async fn extend_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, KvError>;
}
