//! Request log sink.
//!
//! The enforcement engine appends one entry per admitted or bypassed call;
//! the analytics queries aggregate over whatever the sink retained. The
//! engine never reads the log on the hot path.

use crate::error::Result;
use crate::identity::Identity;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One logged request
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub id: Uuid,
    pub identifier: String,
    pub endpoint: String,
    pub timestamp: u64,
    /// Whether the call skipped limit checks via an allow-list entry
    pub bypassed: bool,
}

impl RequestLogEntry {
    pub fn new(identity: &Identity, endpoint: &str, timestamp: u64, bypassed: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier: identity.value.clone(),
            endpoint: endpoint.to_string(),
            timestamp,
            bypassed,
        }
    }
}

/// Aggregate usage computed from the request log
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub total_requests: u64,
    pub top_endpoints: Vec<(String, u64)>,
    pub top_identifiers: Vec<(String, u64)>,
}

/// Sink the engine appends request records to
#[async_trait]
pub trait RequestLogSink: Send + Sync {
    async fn append(&self, entry: RequestLogEntry) -> Result<()>;

    /// Number of retained entries
    async fn count(&self) -> Result<u64>;

    /// Totals and top-N endpoints/identifiers over retained entries
    async fn summarize(&self, top_n: usize) -> Result<UsageSummary>;

    /// Delete entries older than `cutoff`; idempotent, returns removed count
    async fn purge_before(&self, cutoff: u64) -> Result<u64>;
}

/// In-memory request log
pub struct MemoryRequestLog {
    entries: RwLock<Vec<RequestLogEntry>>,
}

impl MemoryRequestLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryRequestLog {
    fn default() -> Self {
        Self::new()
    }
}

fn top_n(counts: HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut pairs: Vec<(String, u64)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    pairs.truncate(n);
    pairs
}

#[async_trait]
impl RequestLogSink for MemoryRequestLog {
    async fn append(&self, entry: RequestLogEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().await.len() as u64)
    }

    async fn summarize(&self, n: usize) -> Result<UsageSummary> {
        let entries = self.entries.read().await;

        let mut endpoints: HashMap<String, u64> = HashMap::new();
        let mut identifiers: HashMap<String, u64> = HashMap::new();
        for entry in entries.iter() {
            *endpoints.entry(entry.endpoint.clone()).or_insert(0) += 1;
            *identifiers.entry(entry.identifier.clone()).or_insert(0) += 1;
        }

        Ok(UsageSummary {
            total_requests: entries.len() as u64,
            top_endpoints: top_n(endpoints, n),
            top_identifiers: top_n(identifiers, n),
        })
    }

    async fn purge_before(&self, cutoff: u64) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn log_call(log: &MemoryRequestLog, identifier: &str, endpoint: &str, ts: u64) {
        let identity = Identity::ip(identifier);
        log.append(RequestLogEntry::new(&identity, endpoint, ts, false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_and_count() {
        let log = MemoryRequestLog::new();
        log_call(&log, "1.1.1.1", "/v1/a", 100).await;
        log_call(&log, "1.1.1.1", "/v1/b", 101).await;
        assert_eq!(log.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_summarize_top_n() {
        let log = MemoryRequestLog::new();
        for _ in 0..3 {
            log_call(&log, "1.1.1.1", "/v1/hot", 100).await;
        }
        log_call(&log, "2.2.2.2", "/v1/cold", 100).await;

        let summary = log.summarize(1).await.unwrap();
        assert_eq!(summary.total_requests, 4);
        assert_eq!(summary.top_endpoints, vec![("/v1/hot".to_string(), 3)]);
        assert_eq!(summary.top_identifiers, vec![("ip:1.1.1.1".to_string(), 3)]);
    }

    #[tokio::test]
    async fn test_purge_before() {
        let log = MemoryRequestLog::new();
        log_call(&log, "1.1.1.1", "/v1/a", 100).await;
        log_call(&log, "1.1.1.1", "/v1/a", 500).await;

        assert_eq!(log.purge_before(200).await.unwrap(), 1);
        assert_eq!(log.purge_before(200).await.unwrap(), 0);
        assert_eq!(log.count().await.unwrap(), 1);
    }
}
