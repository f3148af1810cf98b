//! External key-value store used as the shared cache tier.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::CacheResult;

/// Minimal key-value operations the cache needs.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()>;

    /// Remaining seconds, `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> CacheResult<Option<u64>>;

    /// Delete every key starting with `prefix`, returning how many went.
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<usize>;

    async fn ping(&self) -> CacheResult<()>;
}

/// Redis-backed [`KvStore`].
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn from_client(client: redis::Client) -> Self {
        Self { client }
    }

    async fn conn(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<u64>> {
        let mut conn = self.conn().await?;
        let ttl: i64 = conn.ttl(key).await?;
        // -2: missing, -1: no expiry
        Ok((ttl >= 0).then_some(ttl as u64))
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", prefix))
            .query_async(&mut conn)
            .await?;

        if keys.is_empty() {
            return Ok(0);
        }

        let removed: usize = conn.del(&keys).await?;
        debug!("Deleted {} keys with prefix {}", removed, prefix);
        Ok(removed)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
