use super::scripts::COUNTER_INCREMENT_SCRIPT;
use super::{keys_for, CounterKey, CounterStore};
use crate::config::RedisConfig;
use crate::error::{LimiterError, Result};
use crate::window::Granularity;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use tracing::{debug, info};

/// Redis-backed counter store for deployments where several processes
/// must share one logical set of counters.
///
/// Atomicity comes from Redis itself: the upsert-increment runs as a Lua
/// script, and every row carries a TTL so expired windows purge themselves -
/// `purge_before` is therefore a no-op here.
pub struct RedisCounterStore {
    connection: ConnectionManager,
    prefix: String,
    increment: Script,
}

impl RedisCounterStore {
    /// Connect to Redis and prepare the increment script
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| LimiterError::Config(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| LimiterError::Config(format!("Failed to connect to Redis: {}", e)))?;

        info!(url = %config.url, "Connected Redis counter store");

        Ok(Self {
            connection,
            prefix: config.prefix.clone(),
            increment: Script::new(COUNTER_INCREMENT_SCRIPT),
        })
    }

    fn redis_key(&self, key: &CounterKey) -> String {
        format!("{}{}", self.prefix, key.to_store_key())
    }

    /// Test the Redis connection
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| LimiterError::StoreUnavailable(format!("Redis ping failed: {}", e)))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(
        &self,
        identifier: &str,
        endpoint: &str,
        granularity: Granularity,
        now: u64,
    ) -> Result<u64> {
        let key = self.redis_key(&CounterKey::current(identifier, endpoint, granularity, now));
        let mut conn = self.connection.clone();

        let count: Option<u64> = conn
            .get(&key)
            .await
            .map_err(|e| LimiterError::StoreUnavailable(format!("Redis read failed: {}", e)))?;

        Ok(count.unwrap_or(0))
    }

    async fn increment_all(&self, identifier: &str, endpoint: &str, now: u64) -> Result<()> {
        let mut conn = self.connection.clone();

        for key in keys_for(identifier, endpoint, now) {
            // Keep the row around for a full extra window so the reporter
            // can still read it right after a rollover
            let ttl = key.granularity.secs() * 2;
            let redis_key = self.redis_key(&key);

            let count: u64 = self
                .increment
                .key(&redis_key)
                .arg(ttl)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| {
                    LimiterError::StoreUnavailable(format!("Redis increment failed: {}", e))
                })?;

            debug!(key = %redis_key, count, "Incremented counter");
        }

        Ok(())
    }

    async fn purge_before(&self, _cutoff: u64) -> Result<u64> {
        // Rows expire via their TTL
        Ok(0)
    }
}
