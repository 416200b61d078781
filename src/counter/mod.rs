//! Durable, atomically-incrementable window counters.
//!
//! Counters are keyed by `(identifier, endpoint, granularity, window_start)`
//! and only ever move forward: the single mandatory synchronization point in
//! the whole engine is the atomic upsert-increment here. There is no
//! decrement; counts reset only by a new window starting.

pub mod memory;
pub mod redis;
pub mod scripts;

pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;

use crate::error::Result;
use crate::window::{window_start, Granularity, ALL_GRANULARITIES};
use async_trait::async_trait;

/// Primary key of one counter row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub identifier: String,
    pub endpoint: String,
    pub granularity: Granularity,
    pub window_start: u64,
}

impl CounterKey {
    /// Key for the window containing `now`
    pub fn current(identifier: &str, endpoint: &str, granularity: Granularity, now: u64) -> Self {
        Self {
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
            granularity,
            window_start: window_start(now, granularity),
        }
    }

    /// Flat string form used as the Redis key suffix
    pub fn to_store_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.identifier,
            self.endpoint,
            self.granularity.as_str(),
            self.window_start
        )
    }
}

/// Counter store abstraction over the in-memory and Redis backends
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for the window containing `now`; absence is 0
    async fn get(
        &self,
        identifier: &str,
        endpoint: &str,
        granularity: Granularity,
        now: u64,
    ) -> Result<u64>;

    /// Atomically upsert-increment the counter for every granularity.
    /// Must never lose an increment under concurrent callers.
    async fn increment_all(&self, identifier: &str, endpoint: &str, now: u64) -> Result<()>;

    /// Delete counters whose window start is older than `cutoff`.
    /// Idempotent; returns the number of rows removed.
    async fn purge_before(&self, cutoff: u64) -> Result<u64>;
}

/// Shared helper: the three keys touched by one admitted request
pub(crate) fn keys_for(identifier: &str, endpoint: &str, now: u64) -> [CounterKey; 3] {
    ALL_GRANULARITIES.map(|g| CounterKey::current(identifier, endpoint, g, now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key_floors_window() {
        let key = CounterKey::current("ip:1.2.3.4", "/v1/projects", Granularity::Minute, 125);
        assert_eq!(key.window_start, 120);
        assert_eq!(key.to_store_key(), "ip:1.2.3.4:/v1/projects:minute:120");
    }

    #[test]
    fn test_keys_for_covers_all_granularities() {
        let keys = keys_for("user:42", "/v1/x", 90061);
        assert_eq!(keys[0].granularity, Granularity::Minute);
        assert_eq!(keys[0].window_start, 90060);
        assert_eq!(keys[1].granularity, Granularity::Hour);
        assert_eq!(keys[1].window_start, 90000);
        assert_eq!(keys[2].granularity, Granularity::Day);
        assert_eq!(keys[2].window_start, 86400);
    }
}
