//! TTL cache holding capability-token payloads.
//!
//! The broker only needs four operations, so the cache is a trait object and
//! the process-local [`MemoryTokenCache`] is the default backend. Expiry is the
//! cache's job: an entry past its deadline reads as a miss.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("token cache unavailable: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Store `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Read a live entry without consuming it.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Remove an entry; removing a missing key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Atomically read and remove a live entry.
    async fn take(&self, key: &str) -> CacheResult<Option<String>>;
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process TTL map guarded by a mutex.
///
/// Expired entries are dropped lazily on access and swept on every insert.
#[derive(Default)]
pub struct MemoryTokenCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired ones included until swept.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let entry = self.entries.lock().remove(key);
        Ok(entry
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryTokenCache::new();
        cache
            .set("upload:abc", "payload".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("upload:abc").await.unwrap().as_deref(), Some("payload"));
        // get does not consume
        assert!(cache.get("upload:abc").await.unwrap().is_some());

        cache.delete("upload:abc").await.unwrap();
        assert!(cache.get("upload:abc").await.unwrap().is_none());
        cache.delete("upload:abc").await.unwrap();
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let cache = MemoryTokenCache::new();
        cache
            .set("download:t", "p".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.take("download:t").await.unwrap().as_deref(), Some("p"));
        assert!(cache.take("download:t").await.unwrap().is_none());
        assert!(cache.get("download:t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryTokenCache::new();
        cache
            .set("upload:short", "p".into(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("upload:short").await.unwrap().is_none());
        assert!(cache.take("upload:short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_sweeps_expired_entries() {
        let cache = MemoryTokenCache::new();
        cache
            .set("a", "1".into(), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache
            .set("b", "2".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let cache = MemoryTokenCache::new();
        cache
            .set("upload:x", "up".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get("download:x").await.unwrap().is_none());
    }
}
