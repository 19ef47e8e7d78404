//! Storage capability for counters and cached values.
//!
//! The control plane persists only small strings: cache entries, posting
//! counters and the scan cache version. [`KvStore`] is the minimal contract
//! both backends honour; backend selection happens once at startup via
//! dependency injection, never per call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::time::epoch_ms;

/// Error produced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("store codec error: {0}")]
    Codec(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal get/set/incr contract shared by the in-memory and Redis backends.
///
/// Values are strings; TTLs live in the store. `incr` must be atomic on the
/// backend so hour/day counters and the cache version stay consistent when
/// the store is shared across replicas.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Increment the integer at `key`, creating it at 1 if absent.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Remaining TTL for `key`, or `None` when the key is missing or has no
    /// expiry.
    async fn pttl(&self, key: &str) -> StoreResult<Option<Duration>>;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at_ms: Option<u64>,
}

fn expired(entry: &Entry, now_ms: u64) -> bool {
    entry.expires_at_ms.map_or(false, |t| now_ms >= t)
}

/// Process-local store: a map with lazy per-entry expiry checked on read.
///
/// Correctness needs no background sweep; entries are dropped when a read
/// observes them expired. Single-instance only — it coordinates nothing
/// across processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = epoch_ms();
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            if expired(entry, now) {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at_ms = ttl.map(|t| epoch_ms() + t.as_millis() as u64);
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let now = epoch_ms();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: "0".to_string(),
            expires_at_ms: None,
        });
        if expired(entry, now) {
            entry.value = "0".to_string();
            entry.expires_at_ms = None;
        }
        let n: i64 = entry
            .value
            .parse::<i64>()
            .map_err(|_| StoreError::Codec(format!("non-integer value at {key}")))?
            + 1;
        entry.value = n.to_string();
        Ok(n)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at_ms = Some(epoch_ms() + ttl.as_millis() as u64);
        }
        Ok(())
    }

    async fn pttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = epoch_ms();
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            if expired(entry, now) {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(entry
                .expires_at_ms
                .filter(|&t| t > now)
                .map(|t| Duration::from_millis(t - now)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire_lazily() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.pttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_counts_from_one() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        assert_eq!(store.incr("n").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn incr_restarts_after_expiry() {
        let store = MemoryStore::new();
        store
            .set("n", "5", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.incr("n").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn incr_rejects_non_integer_values() {
        let store = MemoryStore::new();
        store.set("n", "not a number", None).await.unwrap();
        assert!(store.incr("n").await.is_err());
    }

    #[tokio::test]
    async fn pttl_reports_remaining_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        let remaining = store.pttl("k").await.unwrap().unwrap();
        assert!(remaining > Duration::from_secs(9));
        assert!(remaining <= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn expire_applies_to_existing_keys() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        store.expire("k", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
