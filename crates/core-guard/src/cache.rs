//! TTL cache and version-based bulk invalidation.
//!
//! Scan results are cached per distinct query string, so point deletion
//! cannot implement a global bust. Every key embeds a version integer
//! instead: bumping the counter makes all previously written keys
//! unreachable, and TTL expiry reclaims them.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::{KvStore, StoreResult};

/// JSON-encoded cache over a [`KvStore`], TTL per entry.
pub struct TypedCache {
    store: Arc<dyn KvStore>,
    default_ttl: Duration,
}

impl TypedCache {
    pub fn new(store: Arc<dyn KvStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Read `key`. Store failures and undecodable payloads degrade to a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(value) => value?,
            Err(err) => {
                warn!(%err, key, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(%err, key, "cache entry undecodable, treating as miss");
                None
            }
        }
    }

    /// Write `value` under `key`. Best-effort: failures are logged only.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, key, "cache value unencodable, skipping write");
                return;
            }
        };
        let ttl = ttl.unwrap_or(self.default_ttl);
        if let Err(err) = self.store.set(key, &raw, Some(ttl)).await {
            warn!(%err, key, "cache write failed");
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

/// Monotonic version counter embedded in cache keys.
///
/// Lives in the shared store when one is configured, so a bump on any
/// replica invalidates every replica's keys.
pub struct VersionCounter {
    store: Arc<dyn KvStore>,
    key: String,
}

impl VersionCounter {
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Current version. Unreadable or unset counters read as 1.
    pub async fn current(&self) -> i64 {
        match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw
                .parse::<i64>()
                .ok()
                .filter(|version| *version > 0)
                .unwrap_or(1),
            Ok(None) => 1,
            Err(err) => {
                warn!(%err, "version counter unreadable, assuming 1");
                1
            }
        }
    }

    /// Increment the version. The result is always greater than 1, so a bump
    /// invalidates keys written under the implicit initial version.
    pub async fn bump(&self) -> StoreResult<i64> {
        let version = self.store.incr(&self.key).await?;
        if version > 1 {
            return Ok(version);
        }
        self.store.incr(&self.key).await
    }
}
