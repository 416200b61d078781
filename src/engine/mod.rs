//! Per-request enforcement.
//!
//! One evaluation per inbound request, on whatever task the host assigns:
//! list check first (deny short-circuits, allow bypasses limits but still
//! logs), then policy resolution, then per-tier window checks in
//! minute/hour/day order. The first exhausted tier determines the reported
//! retry-after. Admitted requests increment all three tiers atomically and
//! append to the request log.

use crate::config::EnforcementConfig;
use crate::counter::CounterStore;
use crate::error::{LimiterError, Result};
use crate::identity::Identity;
use crate::list::{ListKind, ListStore};
use crate::policy::PolicyResolver;
use crate::reqlog::{RequestLogEntry, RequestLogSink};
use crate::window::{retry_after, unix_now, Granularity, ALL_GRANULARITIES};
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one enforcement evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Within limits; counters incremented and request logged
    Admitted,
    /// Allow-listed; limit checks skipped, request logged, counters untouched
    Bypassed,
    /// Deny-listed; terminal until an operator removes the entry
    Denied,
    /// A tier is exhausted
    Blocked {
        granularity: Granularity,
        limit: u64,
        retry_after: u64,
    },
}

/// The enforcement engine: one instance per process, constructed at startup
/// with injected store handles and shared by reference with the request path.
pub struct EnforcementEngine {
    resolver: Arc<PolicyResolver>,
    counters: Arc<dyn CounterStore>,
    lists: Arc<dyn ListStore>,
    log: Arc<dyn RequestLogSink>,
    fail_open: bool,
    store_timeout: Duration,
}

impl EnforcementEngine {
    pub fn new(
        resolver: Arc<PolicyResolver>,
        counters: Arc<dyn CounterStore>,
        lists: Arc<dyn ListStore>,
        log: Arc<dyn RequestLogSink>,
        config: &EnforcementConfig,
    ) -> Self {
        Self {
            resolver,
            counters,
            lists,
            log,
            fail_open: config.fail_open,
            store_timeout: Duration::from_millis(config.store_timeout_ms),
        }
    }

    /// Evaluate one request at the current wall-clock time
    pub async fn check(
        &self,
        identity: &Identity,
        role: Option<&str>,
        endpoint: &str,
    ) -> Result<Decision> {
        self.check_at(identity, role, endpoint, unix_now()).await
    }

    /// Evaluate one request at an explicit timestamp
    pub async fn check_at(
        &self,
        identity: &Identity,
        role: Option<&str>,
        endpoint: &str,
        now: u64,
    ) -> Result<Decision> {
        match self.list_override(identity, now).await? {
            Some(ListKind::Deny) => {
                warn!(identity = %identity.value, endpoint, "Request denied by deny list");
                counter!("quotaguard_requests_denied_total").increment(1);
                return Ok(Decision::Denied);
            }
            Some(ListKind::Allow) => {
                debug!(identity = %identity.value, endpoint, "Allow-listed, bypassing limits");
                self.append_log(identity, endpoint, now, true).await;
                counter!("quotaguard_requests_bypassed_total").increment(1);
                return Ok(Decision::Bypassed);
            }
            None => {}
        }

        let rule = self.applicable_rule(identity, role, endpoint).await?;
        let limits = self.resolver.resolve_limits(rule.as_ref(), identity);

        for granularity in ALL_GRANULARITIES {
            let Some(limit) = limits.limit_for(granularity) else {
                continue;
            };
            let used = self.current_count(identity, endpoint, granularity, now).await?;
            if used >= limit {
                let retry_after = retry_after(now, granularity);
                warn!(
                    identity = %identity.value,
                    endpoint,
                    tier = %granularity,
                    limit,
                    used,
                    retry_after,
                    "Rate limit exceeded"
                );
                counter!("quotaguard_requests_blocked_total").increment(1);
                return Ok(Decision::Blocked {
                    granularity,
                    limit,
                    retry_after,
                });
            }
        }

        self.record_admission(identity, endpoint, now).await?;
        counter!("quotaguard_requests_admitted_total").increment(1);
        Ok(Decision::Admitted)
    }

    async fn list_override(&self, identity: &Identity, now: u64) -> Result<Option<ListKind>> {
        match self.bounded(self.lists.lookup(identity, now)).await {
            Ok(kind) => Ok(kind),
            Err(e) => self.store_fault("list lookup", e).map(|_| None),
        }
    }

    async fn applicable_rule(
        &self,
        identity: &Identity,
        role: Option<&str>,
        endpoint: &str,
    ) -> Result<Option<crate::policy::RateRule>> {
        match self
            .bounded(self.resolver.find_applicable_rule(endpoint, identity, role))
            .await
        {
            Ok(rule) => Ok(rule),
            // Falling back to defaults on a policy fault keeps the caller
            // limited rather than unlimited
            Err(e) => self.store_fault("policy lookup", e).map(|_| None),
        }
    }

    async fn current_count(
        &self,
        identity: &Identity,
        endpoint: &str,
        granularity: Granularity,
        now: u64,
    ) -> Result<u64> {
        match self
            .bounded(self.counters.get(&identity.value, endpoint, granularity, now))
            .await
        {
            Ok(count) => Ok(count),
            Err(e) => self.store_fault("counter read", e).map(|_| 0),
        }
    }

    async fn record_admission(&self, identity: &Identity, endpoint: &str, now: u64) -> Result<()> {
        if let Err(e) = self
            .bounded(self.counters.increment_all(&identity.value, endpoint, now))
            .await
        {
            self.store_fault("counter increment", e)?;
        }
        self.append_log(identity, endpoint, now, false).await;
        Ok(())
    }

    /// Log-sink failures never affect the decision
    async fn append_log(&self, identity: &Identity, endpoint: &str, now: u64, bypassed: bool) {
        let entry = RequestLogEntry::new(identity, endpoint, now, bypassed);
        if let Err(e) = self.log.append(entry).await {
            warn!(error = %e, "Request log append failed");
        }
    }

    /// Apply the fail-open/fail-closed policy to a store fault
    fn store_fault(&self, operation: &str, error: LimiterError) -> Result<()> {
        counter!("quotaguard_store_faults_total").increment(1);
        if self.fail_open {
            warn!(operation, error = %error, "Store fault, failing open");
            Ok(())
        } else {
            warn!(operation, error = %error, "Store fault, failing closed");
            Err(LimiterError::StoreUnavailable(format!(
                "{} failed: {}",
                operation, error
            )))
        }
    }

    /// Bound a store call so no evaluation blocks for unbounded time
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| LimiterError::StoreUnavailable("store call timed out".to_string()))?
    }
}
