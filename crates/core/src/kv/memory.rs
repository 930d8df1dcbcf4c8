use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{KeyValueStore, KvError};

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process KV store. Single-node only, used by tests and the default
/// binary wiring when no shared cache is configured.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let matches = entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn extend_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == expected => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_and_get() {
        let kv = MemoryKvStore::new();
        assert!(kv.get("k").await.unwrap().is_none());

        kv.set("k", "v", TTL).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));

        kv.set("k", "w", TTL).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("w"));
    }

    #[tokio::test]
    async fn test_set_if_absent_only_first_wins() {
        let kv = MemoryKvStore::new();
        assert!(kv.set_if_absent("lock", "a", TTL).await.unwrap());
        assert!(!kv.set_if_absent("lock", "b", TTL).await.unwrap());
        assert_eq!(kv.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let kv = MemoryKvStore::new();
        kv.set("k", "v", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(kv.get("k").await.unwrap().is_none());
        assert!(kv.set_if_absent("k", "new", TTL).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_delete_if_equals() {
        let kv = MemoryKvStore::new();
        kv.set("lock", "owner-a", TTL).await.unwrap();

        assert!(!kv.delete_if_equals("lock", "owner-b").await.unwrap());
        assert_eq!(kv.get("lock").await.unwrap().as_deref(), Some("owner-a"));

        assert!(kv.delete_if_equals("lock", "owner-a").await.unwrap());
        assert!(kv.get("lock").await.unwrap().is_none());
        assert!(kv.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_if_equals() {
        let kv = MemoryKvStore::new();
        kv.set("lock", "owner-a", Duration::from_secs(5)).await.unwrap();

        assert!(!kv.extend_if_equals("lock", "owner-b", TTL).await.unwrap());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(kv.extend_if_equals("lock", "owner-a", TTL).await.unwrap());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(kv.get("lock").await.unwrap().as_deref(), Some("owner-a"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!kv.extend_if_equals("lock", "owner-a", TTL).await.unwrap());
        assert!(kv.get("lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let kv = MemoryKvStore::new();
        kv.set("k", "v", TTL).await.unwrap();
        assert!(kv.delete("k").await.unwrap());
        assert!(!kv.delete("k").await.unwrap());
    }
}
