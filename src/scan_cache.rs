/*!
 * Versioned scan-result cache.
 *
 * Results are cached per distinct query, so a global bust cannot enumerate
 * keys. Every key embeds the version counter instead; the admin bump makes
 * all prior entries unreachable and TTL expiry reclaims them.
 */

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use rugwatch_core_guard::cache::{TypedCache, VersionCounter};
use rugwatch_core_guard::store::{KvStore, StoreResult};

const VERSION_KEY: &str = "scan:ver";

/// Cache for scan responses, keyed by version + query.
pub struct ScanCache {
    cache: TypedCache,
    version: VersionCounter,
}

impl ScanCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            cache: TypedCache::new(Arc::clone(&store), ttl),
            version: VersionCounter::new(store, VERSION_KEY),
        }
    }

    /// Key for an exact chain/contract lookup.
    pub async fn key_exact(&self, chain: &str, address: &str) -> String {
        format!(
            "scan:v{}:exact:{chain}:{address}",
            self.version.current().await
        )
    }

    /// Key for a free-form query.
    pub async fn key_query(&self, query: &str) -> String {
        format!(
            "scan:v{}:q:{}",
            self.version.current().await,
            query.to_lowercase()
        )
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.get(key).await
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        self.cache.set(key, value, None).await;
    }

    /// Admin cache bust: every key constructed after this call uses the new
    /// version, leaving prior entries unreachable until their TTL runs out.
    pub async fn bump_version(&self) -> StoreResult<i64> {
        self.version.bump().await
    }

    pub async fn current_version(&self) -> i64 {
        self.version.current().await
    }
}
