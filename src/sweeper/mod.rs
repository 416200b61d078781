//! Retention sweeper.
//!
//! A periodic background task fully decoupled from request handling. Every
//! pass issues only commutative, idempotent deletes against rows no live
//! request can still touch, so overlapping or repeated runs are safe.

use crate::config::RetentionConfig;
use crate::counter::CounterStore;
use crate::list::ListStore;
use crate::reqlog::RequestLogSink;
use crate::window::unix_now;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Rows removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub counters_removed: u64,
    pub list_entries_removed: u64,
    pub log_entries_removed: u64,
}

/// Background purge of stale counters, expired list entries and old log rows
pub struct RetentionSweeper {
    counters: Arc<dyn CounterStore>,
    lists: Arc<dyn ListStore>,
    log: Arc<dyn RequestLogSink>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        lists: Arc<dyn ListStore>,
        log: Arc<dyn RequestLogSink>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            counters,
            lists,
            log,
            config,
        }
    }

    /// Spawn the periodic sweep task
    pub fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Retention sweeper disabled");
            return;
        }

        let sweep_interval = Duration::from_secs(self.config.sweep_interval_secs);
        info!(
            interval_secs = self.config.sweep_interval_secs,
            counter_horizon_secs = self.config.counter_horizon_secs,
            log_retention_secs = self.config.log_retention_secs,
            "Starting retention sweeper"
        );

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            // The first tick fires immediately; skip it so startup stays quiet
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.sweep_once(unix_now()).await;
            }
        });
    }

    /// One idempotent sweep pass. Faults in one store never stop the others.
    pub async fn sweep_once(&self, now: u64) -> SweepReport {
        let mut report = SweepReport::default();

        let counter_cutoff = now.saturating_sub(self.config.counter_horizon_secs);
        match self.counters.purge_before(counter_cutoff).await {
            Ok(removed) => report.counters_removed = removed,
            Err(e) => warn!(error = %e, "Counter purge failed"),
        }

        match self.lists.purge_expired(now).await {
            Ok(removed) => report.list_entries_removed = removed,
            Err(e) => warn!(error = %e, "List purge failed"),
        }

        let log_cutoff = now.saturating_sub(self.config.log_retention_secs);
        match self.log.purge_before(log_cutoff).await {
            Ok(removed) => report.log_entries_removed = removed,
            Err(e) => warn!(error = %e, "Request log purge failed"),
        }

        counter!("quotaguard_sweeper_counters_removed_total")
            .increment(report.counters_removed);
        counter!("quotaguard_sweeper_list_entries_removed_total")
            .increment(report.list_entries_removed);
        counter!("quotaguard_sweeper_log_entries_removed_total")
            .increment(report.log_entries_removed);

        debug!(
            counters = report.counters_removed,
            list_entries = report.list_entries_removed,
            log_entries = report.log_entries_removed,
            "Sweep complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use crate::identity::{Identity, IdentityClass};
    use crate::list::{ListEntrySpec, ListKind, MemoryListStore};
    use crate::reqlog::{MemoryRequestLog, RequestLogEntry};

    fn sweeper_with_stores() -> (
        RetentionSweeper,
        Arc<MemoryCounterStore>,
        Arc<MemoryListStore>,
        Arc<MemoryRequestLog>,
    ) {
        let counters = Arc::new(MemoryCounterStore::new());
        let lists = Arc::new(MemoryListStore::new());
        let log = Arc::new(MemoryRequestLog::new());
        let sweeper = RetentionSweeper::new(
            counters.clone(),
            lists.clone(),
            log.clone(),
            RetentionConfig {
                enabled: true,
                sweep_interval_secs: 3600,
                counter_horizon_secs: 172800,
                log_retention_secs: 86400 * 30,
            },
        );
        (sweeper, counters, lists, log)
    }

    #[tokio::test]
    async fn test_sweep_purges_all_stores() {
        let (sweeper, counters, lists, log) = sweeper_with_stores();
        let now: u64 = 86400 * 40;

        // Stale counters from five days ago, fresh ones from now
        counters
            .increment_all("ip:1.1.1.1", "/v1/x", now - 86400 * 5)
            .await
            .unwrap();
        counters
            .increment_all("ip:1.1.1.1", "/v1/x", now)
            .await
            .unwrap();

        lists
            .add(
                ListEntrySpec {
                    identifier: "1.1.1.1".to_string(),
                    identifier_type: IdentityClass::Ip,
                    kind: ListKind::Deny,
                    reason: None,
                    expires_at: Some(now - 10),
                },
                now - 100,
            )
            .await
            .unwrap();

        let identity = Identity::ip("1.1.1.1");
        log.append(RequestLogEntry::new(&identity, "/v1/x", now - 86400 * 35, false))
            .await
            .unwrap();
        log.append(RequestLogEntry::new(&identity, "/v1/x", now, false))
            .await
            .unwrap();

        let report = sweeper.sweep_once(now).await;
        assert_eq!(report.counters_removed, 3);
        assert_eq!(report.list_entries_removed, 1);
        assert_eq!(report.log_entries_removed, 1);

        // Live rows survive
        assert_eq!(counters.len(), 3);
        assert_eq!(log.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (sweeper, counters, _, _) = sweeper_with_stores();
        let now: u64 = 86400 * 40;
        counters
            .increment_all("ip:1.1.1.1", "/v1/x", now - 86400 * 5)
            .await
            .unwrap();

        assert_eq!(sweeper.sweep_once(now).await.counters_removed, 3);
        assert_eq!(sweeper.sweep_once(now).await, SweepReport::default());
    }
}
