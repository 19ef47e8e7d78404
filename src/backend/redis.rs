/*!
 * Redis-backed implementation of the store capability.
 *
 * All access is single-round-trip GET/SET/INCR/PEXPIRE/PTTL; counters rely
 * on Redis INCR atomicity when the substrate is shared across replicas.
 */

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use rugwatch_core_guard::store::{KvStore, StoreError, StoreResult};

fn to_store_err(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Shared-substrate store over a managed Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and build the managed (auto-reconnecting) connection.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(to_store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(to_store_err)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_store_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(to_store_err)?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_store_err)?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(to_store_err)?;
        Ok(())
    }

    async fn pttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let ms: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_store_err)?;
        // -2 means the key is missing, -1 means it has no expiry.
        Ok((ms > 0).then(|| Duration::from_millis(ms as u64)))
    }
}
