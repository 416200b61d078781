//! Administrator-defined rate rules and their resolution.
//!
//! Rules are evaluated in `(priority desc, id asc)` order; the first active
//! rule whose identifier type matches the caller (or whose type is `Role`
//! with a matching role) and whose endpoint pattern matches the request path
//! wins. When no rule matches, built-in defaults apply - distinct for
//! anonymous and authenticated callers. A matched rule with an unset
//! per-tier limit means unlimited for that tier; only the *absence* of a
//! matching rule falls back to defaults.

use crate::config::DefaultLimitsConfig;
use crate::error::{LimiterError, Result};
use crate::identity::{Identity, IdentityClass};
use crate::window::Granularity;
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Which callers a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    User,
    Ip,
    ApiKey,
    /// Applies to authenticated users holding a specific role
    Role,
}

impl IdentifierType {
    /// Whether a rule of this type can apply to the given identity class
    fn applies_to(&self, class: IdentityClass) -> bool {
        match self {
            IdentifierType::User => class == IdentityClass::User,
            IdentifierType::Ip => class == IdentityClass::Ip,
            IdentifierType::ApiKey => class == IdentityClass::ApiKey,
            IdentifierType::Role => class == IdentityClass::User,
        }
    }
}

/// An administrator-defined rate rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRule {
    pub id: u64,
    pub name: String,
    /// Glob-style endpoint pattern; `*` matches any run of characters
    pub endpoint_pattern: String,
    pub identifier_type: IdentifierType,
    /// Required role, for `Role`-typed rules
    #[serde(default)]
    pub role: Option<String>,
    /// Unset means unlimited for that tier
    #[serde(default)]
    pub limit_per_minute: Option<u64>,
    #[serde(default)]
    pub limit_per_hour: Option<u64>,
    #[serde(default)]
    pub limit_per_day: Option<u64>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl RateRule {
    /// The rule's limit for one tier, unset meaning unlimited
    pub fn limit_for(&self, granularity: Granularity) -> Option<u64> {
        match granularity {
            Granularity::Minute => self.limit_per_minute,
            Granularity::Hour => self.limit_per_hour,
            Granularity::Day => self.limit_per_day,
        }
    }
}

/// Rule fields supplied by administrators on create/update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub endpoint_pattern: String,
    pub identifier_type: IdentifierType,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub limit_per_minute: Option<u64>,
    #[serde(default)]
    pub limit_per_hour: Option<u64>,
    #[serde(default)]
    pub limit_per_day: Option<u64>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl RuleSpec {
    fn validate(&self) -> Result<()> {
        if self.endpoint_pattern.is_empty() {
            return Err(LimiterError::Config(
                "Endpoint pattern cannot be empty".to_string(),
            ));
        }
        if self.identifier_type == IdentifierType::Role && self.role.is_none() {
            return Err(LimiterError::Config(
                "Role-typed rules require a role".to_string(),
            ));
        }
        for limit in [
            self.limit_per_minute,
            self.limit_per_hour,
            self.limit_per_day,
        ]
        .into_iter()
        .flatten()
        {
            if limit == 0 {
                return Err(LimiterError::Config("Limits must be > 0".to_string()));
            }
        }
        Ok(())
    }
}

/// Store of administrator-defined rules, read-only to the enforcement path
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All rules, including inactive ones
    async fn list(&self) -> Result<Vec<RateRule>>;

    /// Active rules only
    async fn active_rules(&self) -> Result<Vec<RateRule>>;

    async fn get(&self, id: u64) -> Result<RateRule>;

    async fn create(&self, spec: RuleSpec) -> Result<RateRule>;

    async fn update(&self, id: u64, spec: RuleSpec) -> Result<RateRule>;

    async fn delete(&self, id: u64) -> Result<()>;
}

/// In-memory policy store with store-assigned sequential ids
pub struct MemoryPolicyStore {
    rules: DashMap<u64, RateRule>,
    next_id: AtomicU64,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self {
            rules: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn list(&self) -> Result<Vec<RateRule>> {
        let mut rules: Vec<RateRule> = self.rules.iter().map(|e| e.value().clone()).collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn active_rules(&self) -> Result<Vec<RateRule>> {
        Ok(self
            .rules
            .iter()
            .filter(|e| e.value().active)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn get(&self, id: u64) -> Result<RateRule> {
        self.rules
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(LimiterError::RuleNotFound(id))
    }

    async fn create(&self, spec: RuleSpec) -> Result<RateRule> {
        spec.validate()?;
        compile_pattern(&spec.endpoint_pattern)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rule = RateRule {
            id,
            name: spec.name,
            endpoint_pattern: spec.endpoint_pattern,
            identifier_type: spec.identifier_type,
            role: spec.role,
            limit_per_minute: spec.limit_per_minute,
            limit_per_hour: spec.limit_per_hour,
            limit_per_day: spec.limit_per_day,
            priority: spec.priority,
            active: spec.active,
        };
        self.rules.insert(id, rule.clone());
        Ok(rule)
    }

    async fn update(&self, id: u64, spec: RuleSpec) -> Result<RateRule> {
        spec.validate()?;
        compile_pattern(&spec.endpoint_pattern)?;

        let mut entry = self
            .rules
            .get_mut(&id)
            .ok_or(LimiterError::RuleNotFound(id))?;
        let rule = RateRule {
            id,
            name: spec.name,
            endpoint_pattern: spec.endpoint_pattern,
            identifier_type: spec.identifier_type,
            role: spec.role,
            limit_per_minute: spec.limit_per_minute,
            limit_per_hour: spec.limit_per_hour,
            limit_per_day: spec.limit_per_day,
            priority: spec.priority,
            active: spec.active,
        };
        *entry = rule.clone();
        Ok(rule)
    }

    async fn delete(&self, id: u64) -> Result<()> {
        self.rules
            .remove(&id)
            .map(|_| ())
            .ok_or(LimiterError::RuleNotFound(id))
    }
}

/// Translate a glob-style endpoint pattern into an anchored regex.
/// `*` matches any run of characters; everything else is literal.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for (i, segment) in pattern.split('*').enumerate() {
        if i > 0 {
            regex.push_str(".*");
        }
        regex.push_str(&regex::escape(segment));
    }
    regex.push('$');

    Regex::new(&regex)
        .map_err(|e| LimiterError::Config(format!("Invalid endpoint pattern '{}': {}", pattern, e)))
}

/// Per-tier effective limits for one request; `None` means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSet {
    pub per_minute: Option<u64>,
    pub per_hour: Option<u64>,
    pub per_day: Option<u64>,
}

impl LimitSet {
    pub fn limit_for(&self, granularity: Granularity) -> Option<u64> {
        match granularity {
            Granularity::Minute => self.per_minute,
            Granularity::Hour => self.per_hour,
            Granularity::Day => self.per_day,
        }
    }
}

/// Selects the applicable rule for a request and resolves effective limits
pub struct PolicyResolver {
    store: Arc<dyn PolicyStore>,
    defaults: DefaultLimitsConfig,
    pattern_cache: DashMap<String, Regex>,
}

impl PolicyResolver {
    pub fn new(store: Arc<dyn PolicyStore>, defaults: DefaultLimitsConfig) -> Self {
        Self {
            store,
            defaults,
            pattern_cache: DashMap::new(),
        }
    }

    /// The single highest-priority rule matching this request, if any
    pub async fn find_applicable_rule(
        &self,
        endpoint: &str,
        identity: &Identity,
        role: Option<&str>,
    ) -> Result<Option<RateRule>> {
        let mut candidates: Vec<RateRule> = self
            .store
            .active_rules()
            .await?
            .into_iter()
            .filter(|r| r.identifier_type.applies_to(identity.class))
            .collect();

        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        for rule in candidates {
            if rule.identifier_type == IdentifierType::Role
                && rule.role.as_deref() != role
            {
                continue;
            }
            if self.pattern_matches(&rule.endpoint_pattern, endpoint) {
                return Ok(Some(rule));
            }
        }

        Ok(None)
    }

    /// Effective per-tier limits: the rule's own values when one matched
    /// (unset = unlimited), else the built-in defaults for the caller class
    pub fn resolve_limits(&self, rule: Option<&RateRule>, identity: &Identity) -> LimitSet {
        match rule {
            Some(rule) => LimitSet {
                per_minute: rule.limit_per_minute,
                per_hour: rule.limit_per_hour,
                per_day: rule.limit_per_day,
            },
            None => {
                let defaults = if identity.is_authenticated() {
                    self.defaults.authenticated
                } else {
                    self.defaults.anonymous
                };
                LimitSet {
                    per_minute: Some(defaults.per_minute),
                    per_hour: Some(defaults.per_hour),
                    per_day: Some(defaults.per_day),
                }
            }
        }
    }

    fn pattern_matches(&self, pattern: &str, endpoint: &str) -> bool {
        if let Some(regex) = self.pattern_cache.get(pattern) {
            return regex.is_match(endpoint);
        }

        match compile_pattern(pattern) {
            Ok(regex) => {
                let matched = regex.is_match(endpoint);
                self.pattern_cache.insert(pattern.to_string(), regex);
                matched
            }
            Err(e) => {
                // Stored rules are validated on write; treat a bad pattern
                // as a non-match rather than failing the request
                warn!(pattern = %pattern, error = %e, "Skipping rule with invalid pattern");
                false
            }
        }
    }
}
