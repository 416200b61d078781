//! Response metadata: limit / remaining / reset per tier.
//!
//! The reporter runs independently of the enforcement decision so it can
//! serve allow-listed callers and the status endpoint too. It re-reads
//! current counts through the same resolver and counter store enforcement
//! uses, so a just-performed increment is reflected.

use crate::counter::CounterStore;
use crate::error::Result;
use crate::identity::Identity;
use crate::policy::PolicyResolver;
use crate::window::{window_reset, Granularity};
use axum::http::{HeaderMap, HeaderValue};
use serde::Serialize;
use std::sync::Arc;

/// Usage of one tier at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    pub granularity: Granularity,
    /// Unset means unlimited for this tier
    pub limit: Option<u64>,
    pub used: u64,
    pub remaining: Option<u64>,
    /// Unix timestamp of the next window boundary
    pub reset: u64,
}

/// Current usage for the minute and hour tiers
#[derive(Debug, Clone, Serialize)]
pub struct UsageStatus {
    pub identifier: String,
    pub minute: TierStatus,
    pub hour: TierStatus,
}

/// Computes response metadata and status-endpoint payloads
pub struct UsageReporter {
    resolver: Arc<PolicyResolver>,
    counters: Arc<dyn CounterStore>,
}

impl UsageReporter {
    pub fn new(resolver: Arc<PolicyResolver>, counters: Arc<dyn CounterStore>) -> Self {
        Self { resolver, counters }
    }

    /// Current usage for the caller on this endpoint, without counting
    /// as a billable call
    pub async fn status(
        &self,
        identity: &Identity,
        role: Option<&str>,
        endpoint: &str,
        now: u64,
    ) -> Result<UsageStatus> {
        let rule = self
            .resolver
            .find_applicable_rule(endpoint, identity, role)
            .await?;
        let limits = self.resolver.resolve_limits(rule.as_ref(), identity);

        Ok(UsageStatus {
            identifier: identity.value.clone(),
            minute: self
                .tier_status(identity, endpoint, Granularity::Minute, &limits, now)
                .await?,
            hour: self
                .tier_status(identity, endpoint, Granularity::Hour, &limits, now)
                .await?,
        })
    }

    async fn tier_status(
        &self,
        identity: &Identity,
        endpoint: &str,
        granularity: Granularity,
        limits: &crate::policy::LimitSet,
        now: u64,
    ) -> Result<TierStatus> {
        let used = self
            .counters
            .get(&identity.value, endpoint, granularity, now)
            .await?;
        let limit = limits.limit_for(granularity);
        Ok(TierStatus {
            granularity,
            limit,
            used,
            remaining: limit.map(|l| l.saturating_sub(used)),
            reset: window_reset(now, granularity),
        })
    }
}

/// Attach `X-RateLimit-*` headers for the minute and hour tiers.
/// Unlimited tiers contribute no headers.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &UsageStatus) {
    attach_tier(headers, &status.minute, "");
    attach_tier(headers, &status.hour, "-Hour");
}

fn attach_tier(headers: &mut HeaderMap, tier: &TierStatus, suffix: &str) {
    let (Some(limit), Some(remaining)) = (tier.limit, tier.remaining) else {
        return;
    };

    let pairs = [
        (format!("X-RateLimit-Limit{}", suffix), limit),
        (format!("X-RateLimit-Remaining{}", suffix), remaining),
        (format!("X-RateLimit-Reset{}", suffix), tier.reset),
    ];
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            name.parse::<axum::http::HeaderName>(),
            HeaderValue::from_str(&value.to_string()),
        ) {
            headers.insert(name, value);
        }
    }
}
