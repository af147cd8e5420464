//! Shared state store abstraction and the Redis implementation
//!
//! Every scheduler instance and worker coordinates exclusively through this
//! store: task records, lifecycle indices and admission tokens all live here.
//! The trait exposes only the primitives the scheduler needs - plain keys with
//! TTL, sorted sets scored by timestamp, a hash counter, and two composite
//! operations that must execute atomically:
//!
//! - [`StateStore::zadd_capped`] - evict expired members, then insert only if
//!   the live cardinality is below a cap (the admission check)
//! - [`StateStore::put_indexed`] - write a record and move its id between
//!   indices in one step, so no reader ever observes one without the other
//!
//! Any store offering single-operation atomicity on these suffices;
//! [`RedisStore`] is the production implementation and
//! [`MemoryStore`](memory::MemoryStore) backs tests and single-process runs.

use anyhow::Context;
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use std::time::Duration;

use crate::error::{Error, Result};

pub mod memory;

pub use memory::MemoryStore;

/// One atomic record write plus index maintenance
///
/// `create_only` turns the write into a set-NX: it fails (returns false)
/// when the record already exists. `remove_index`/`add_indexes` are sorted
/// sets keyed on `member` with `score`.
#[derive(Debug, Clone)]
pub struct IndexedWrite<'a> {
    pub record_key: &'a str,
    pub value: &'a str,
    pub ttl: Option<Duration>,
    pub create_only: bool,
    pub member: &'a str,
    pub score: f64,
    pub remove_index: Option<&'a str>,
    pub add_indexes: Vec<&'a str>,
}

/// Low-latency shared store reachable by every scheduler instance and worker
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a plain value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a plain value with an optional TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Add a member to a sorted set (upserts the score)
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Atomic admission insert: drop members with score <= `evict_below`,
    /// then insert iff the remaining cardinality is below `max`
    /// (`max == 0` means unconditional). Returns whether the insert happened.
    async fn zadd_capped(
        &self,
        key: &str,
        member: &str,
        score: f64,
        max: u64,
        evict_below: f64,
    ) -> Result<bool>;

    /// Remove one member; returns whether it was present
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;

    /// Remove all members with score <= `below`; returns the removed count
    async fn zremrangebyscore(&self, key: &str, below: f64) -> Result<u64>;

    /// Sorted-set cardinality
    async fn zcard(&self, key: &str) -> Result<u64>;

    /// Members by rank, ascending score; `start`/`stop` are inclusive and
    /// follow sorted-set conventions (`-1` means the last member)
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Increment a hash field; returns the new value
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Atomic record + index write; returns false when `create_only` is set
    /// and the record already exists
    async fn put_indexed(&self, write: IndexedWrite<'_>) -> Result<bool>;
}

// Lua: admission token insert with lazy expiry eviction.
// KEYS[1] = token set; ARGV = [evict_below, max, score, member]
const ZADD_CAPPED_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local max = tonumber(ARGV[2])
if max > 0 and redis.call('ZCARD', KEYS[1]) >= max then
    return 0
end
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[4])
return 1
"#;

// Lua: record write plus index moves in one step.
// KEYS[1] = record, KEYS[2..] = [remove_index?] ++ add_indexes
// ARGV = [value, ttl_secs (0 = none), create_only, member, score, has_remove]
const PUT_INDEXED_SCRIPT: &str = r#"
if ARGV[3] == '1' and redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
if tonumber(ARGV[2]) > 0 then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
else
    redis.call('SET', KEYS[1], ARGV[1])
end
local i = 2
if ARGV[6] == '1' then
    redis.call('ZREM', KEYS[i], ARGV[4])
    i = i + 1
end
while i <= #KEYS do
    redis.call('ZADD', KEYS[i], ARGV[5], ARGV[4])
    i = i + 1
end
return 1
"#;

/// Redis configuration for the shared store
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g. redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
        }
    }
}

/// Redis-backed shared state store
pub struct RedisStore {
    pool: Pool,
    zadd_capped: redis::Script,
    put_indexed: redis::Script,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let pool = Self::build_pool(config).map_err(|e| Error::store_unavailable(e.to_string()))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to ping Redis")
            .map_err(|e| Error::store_unavailable(e.to_string()))?;

        tracing::info!(url = %config.url, "Connected to Redis state store");

        Ok(Self {
            pool,
            zadd_capped: redis::Script::new(ZADD_CAPPED_SCRIPT),
            put_indexed: redis::Script::new(PUT_INDEXED_SCRIPT),
        })
    }

    fn build_pool(config: &RedisConfig) -> anyhow::Result<Pool> {
        let pool_config = PoolConfig::from_url(&config.url);
        pool_config
            .builder()
            .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .context("Failed to create Redis connection pool")
    }

    /// Check if the store is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let result: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(result == "PONG")
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.pool.get().await?;
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zadd_capped(
        &self,
        key: &str,
        member: &str,
        score: f64,
        max: u64,
        evict_below: f64,
    ) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let inserted: i64 = self
            .zadd_capped
            .key(key)
            .arg(evict_below)
            .arg(max)
            .arg(score)
            .arg(member)
            .invoke_async(&mut *conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: u64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zremrangebyscore(&self, key: &str, below: f64) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let removed: u64 = conn.zrembyscore(key, f64::NEG_INFINITY, below).await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn.zrange(key, start, stop).await?;
        Ok(members)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let value: i64 = conn.hincr(key, field, delta).await?;
        Ok(value)
    }

    async fn put_indexed(&self, write: IndexedWrite<'_>) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let mut invocation = self.put_indexed.prepare_invoke();
        invocation.key(write.record_key);
        if let Some(remove) = write.remove_index {
            invocation.key(remove);
        }
        for index in &write.add_indexes {
            invocation.key(*index);
        }
        invocation
            .arg(write.value)
            .arg(write.ttl.map(|t| t.as_secs()).unwrap_or(0))
            .arg(if write.create_only { "1" } else { "0" })
            .arg(write.member)
            .arg(write.score)
            .arg(if write.remove_index.is_some() { "1" } else { "0" });

        let written: i64 = invocation.invoke_async(&mut *conn).await?;
        Ok(written == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        let config = RedisConfig::default();
        assert_eq!(config.pool_size, 10);
        assert!(config.url.starts_with("redis://"));
    }

    // Integration tests require running Redis
    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_redis_connection() {
        let config = RedisConfig::default();
        let store = RedisStore::connect(&config).await;
        assert!(store.is_ok());
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_redis_zadd_capped() {
        let store = RedisStore::connect(&RedisConfig::default()).await.unwrap();
        let key = "fanout:test:tokens";
        let _ = store.delete(key).await;

        let far_future = 10_f64.powi(15);
        assert!(store.zadd_capped(key, "a", far_future, 2, 0.0).await.unwrap());
        assert!(store.zadd_capped(key, "b", far_future, 2, 0.0).await.unwrap());
        assert!(!store.zadd_capped(key, "c", far_future, 2, 0.0).await.unwrap());

        let _ = store.delete(key).await;
    }
}
