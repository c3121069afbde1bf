//! Key-value stores backing the result cache

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failures of a cache backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry corrupted: {0}")]
    Corrupted(String),
}

/// Any key-value store with get/put/TTL semantics
///
/// Writes are all-or-nothing: a reader sees either no entry or the complete
/// payload that was put.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Drop expired entries, returning how many were removed
    fn purge_expired(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// In-process store; TTL is checked on read
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredEntry>,
    offline: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage; every call fails while offline
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }
        Ok(())
    }
}

impl CacheStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.payload.clone()));
        match hit {
            Some((true, payload)) => Ok(Some(payload)),
            Some((false, _)) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.check_online()?;
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.entries.remove(key);
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        self.check_online()?;
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let store = InMemoryStore::new();
        store.put("k", b"payload".to_vec(), Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"payload"[..]));
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_expired_entries_are_invisible() {
        let store = InMemoryStore::new();
        store.put("old", vec![1], Duration::ZERO).unwrap();
        store.put("new", vec![2], Duration::from_secs(60)).unwrap();
        assert!(store.get("old").unwrap().is_none());
        store.put("old", vec![1], Duration::ZERO).unwrap();
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_offline_store_reports_unavailable() {
        let store = InMemoryStore::new();
        store.set_offline(true);
        assert!(matches!(store.get("k"), Err(StoreError::Unavailable(_))));
        store.set_offline(false);
        assert!(store.get("k").unwrap().is_none());
    }
}
