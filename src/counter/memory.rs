use super::{keys_for, CounterKey, CounterStore};
use crate::error::Result;
use crate::window::Granularity;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// In-memory counter store.
///
/// Each increment goes through the map's entry API, which holds the shard
/// write lock for the duration of the upsert - concurrent increments on the
/// same key serialize there, so no update is ever lost.
pub struct MemoryCounterStore {
    counters: DashMap<CounterKey, u64>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Number of live counter rows (for tests and monitoring)
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(
        &self,
        identifier: &str,
        endpoint: &str,
        granularity: Granularity,
        now: u64,
    ) -> Result<u64> {
        let key = CounterKey::current(identifier, endpoint, granularity, now);
        Ok(self.counters.get(&key).map(|e| *e).unwrap_or(0))
    }

    async fn increment_all(&self, identifier: &str, endpoint: &str, now: u64) -> Result<()> {
        for key in keys_for(identifier, endpoint, now) {
            *self.counters.entry(key).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn purge_before(&self, cutoff: u64) -> Result<u64> {
        let removed = AtomicU64::new(0);
        self.counters.retain(|key, _| {
            if key.window_start < cutoff {
                removed.fetch_add(1, Ordering::Relaxed);
                false
            } else {
                true
            }
        });

        let removed = removed.into_inner();
        if removed > 0 {
            debug!(removed, "Purged stale counters");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_absent_counter_reads_zero() {
        let store = MemoryCounterStore::new();
        let count = store
            .get("ip:1.2.3.4", "/v1/x", Granularity::Minute, 1000)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_increment_all_touches_every_tier() {
        let store = MemoryCounterStore::new();
        store.increment_all("ip:1.2.3.4", "/v1/x", 1000).await.unwrap();
        store.increment_all("ip:1.2.3.4", "/v1/x", 1001).await.unwrap();

        for g in [Granularity::Minute, Granularity::Hour, Granularity::Day] {
            let count = store.get("ip:1.2.3.4", "/v1/x", g, 1001).await.unwrap();
            assert_eq!(count, 2, "tier {}", g);
        }
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_new_window_starts_fresh() {
        let store = MemoryCounterStore::new();
        store.increment_all("ip:1.2.3.4", "/v1/x", 59).await.unwrap();

        // Next minute: minute counter resets, hour and day carry over
        assert_eq!(
            store
                .get("ip:1.2.3.4", "/v1/x", Granularity::Minute, 60)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .get("ip:1.2.3.4", "/v1/x", Granularity::Hour, 60)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut handles = Vec::new();

        for _ in 0..1000 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_all("user:42", "/v1/x", 5000).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let count = store
            .get("user:42", "/v1/x", Granularity::Minute, 5000)
            .await
            .unwrap();
        assert_eq!(count, 1000);
    }

    #[tokio::test]
    async fn test_purge_before_is_idempotent() {
        let store = MemoryCounterStore::new();
        store.increment_all("ip:1.2.3.4", "/v1/x", 100).await.unwrap();
        store
            .increment_all("ip:1.2.3.4", "/v1/x", 200_000)
            .await
            .unwrap();

        // Drops the three rows from t=100, keeps the newer window rows
        let removed = store.purge_before(100_000).await.unwrap();
        assert_eq!(removed, 3);
        let removed = store.purge_before(100_000).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.len(), 3);
    }
}
