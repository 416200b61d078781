//! Allow/deny list overrides.
//!
//! A deny entry, if present and unexpired, overrides everything else and is
//! checked before allow. An allow entry bypasses limit checks but not
//! request logging. Entries with an expiry in the past behave as absent and
//! are eventually purged by the retention sweeper.

use crate::error::{LimiterError, Result};
use crate::identity::{Identity, IdentityClass};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Which way a list entry overrides enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Allow,
    Deny,
}

/// One allow/deny entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntry {
    pub id: u64,
    /// Raw identifier the entry targets, e.g. `1.2.3.4` or a user id
    pub identifier: String,
    pub identifier_type: IdentityClass,
    pub kind: ListKind,
    #[serde(default)]
    pub reason: Option<String>,
    /// Unix seconds; unset means the entry never expires
    #[serde(default)]
    pub expires_at: Option<u64>,
    pub created_at: u64,
}

impl ListEntry {
    fn expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    fn matches(&self, identity: &Identity) -> bool {
        self.identifier_type == identity.class
            && identity.value == prefixed(self.identifier_type, &self.identifier)
    }
}

/// Entry fields supplied on add
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntrySpec {
    pub identifier: String,
    pub identifier_type: IdentityClass,
    pub kind: ListKind,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

fn prefixed(class: IdentityClass, identifier: &str) -> String {
    match class {
        IdentityClass::ApiKey => format!("key:{}", identifier),
        IdentityClass::User => format!("user:{}", identifier),
        IdentityClass::Ip => format!("ip:{}", identifier),
    }
}

/// Store of allow/deny entries
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Add an entry; unique per `(identifier, identifier_type, kind)`
    async fn add(&self, spec: ListEntrySpec, now: u64) -> Result<ListEntry>;

    async fn remove(&self, id: u64) -> Result<()>;

    /// All entries, optionally filtered by kind
    async fn list(&self, kind: Option<ListKind>) -> Result<Vec<ListEntry>>;

    /// The effective override for this identity, expiry-aware.
    /// Deny wins over allow when both are present.
    async fn lookup(&self, identity: &Identity, now: u64) -> Result<Option<ListKind>>;

    /// Delete expired entries; idempotent, returns the number removed
    async fn purge_expired(&self, now: u64) -> Result<u64>;
}

/// In-memory list store
pub struct MemoryListStore {
    entries: DashMap<u64, ListEntry>,
    next_id: AtomicU64,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryListStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn add(&self, spec: ListEntrySpec, now: u64) -> Result<ListEntry> {
        if spec.identifier.is_empty() {
            return Err(LimiterError::Config(
                "List entry identifier cannot be empty".to_string(),
            ));
        }

        let duplicate = self.entries.iter().any(|e| {
            e.identifier == spec.identifier
                && e.identifier_type == spec.identifier_type
                && e.kind == spec.kind
        });
        if duplicate {
            return Err(LimiterError::DuplicateListEntry(spec.identifier));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = ListEntry {
            id,
            identifier: spec.identifier,
            identifier_type: spec.identifier_type,
            kind: spec.kind,
            reason: spec.reason,
            expires_at: spec.expires_at,
            created_at: now,
        };
        self.entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn remove(&self, id: u64) -> Result<()> {
        self.entries
            .remove(&id)
            .map(|_| ())
            .ok_or(LimiterError::ListEntryNotFound(id))
    }

    async fn list(&self, kind: Option<ListKind>) -> Result<Vec<ListEntry>> {
        let mut entries: Vec<ListEntry> = self
            .entries
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn lookup(&self, identity: &Identity, now: u64) -> Result<Option<ListKind>> {
        let mut allowed = false;
        for entry in self.entries.iter() {
            if entry.expired(now) || !entry.matches(identity) {
                continue;
            }
            match entry.kind {
                ListKind::Deny => return Ok(Some(ListKind::Deny)),
                ListKind::Allow => allowed = true,
            }
        }
        Ok(allowed.then_some(ListKind::Allow))
    }

    async fn purge_expired(&self, now: u64) -> Result<u64> {
        let removed = AtomicU64::new(0);
        self.entries.retain(|_, entry| {
            if entry.expired(now) {
                removed.fetch_add(1, Ordering::Relaxed);
                false
            } else {
                true
            }
        });

        let removed = removed.into_inner();
        if removed > 0 {
            debug!(removed, "Purged expired list entries");
        }
        Ok(removed)
    }
}
