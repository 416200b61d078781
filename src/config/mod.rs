use crate::error::{LimiterError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LimiterConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Identity resolution configuration
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Built-in default limits used when no rule matches
    #[serde(default)]
    pub defaults: DefaultLimitsConfig,
    /// Enforcement behavior
    #[serde(default)]
    pub enforcement: EnforcementConfig,
    /// Retention sweeper configuration
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Redis backend for counters (in-memory when absent)
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Where the identifier resolver looks for caller credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Header carrying the API key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Query parameter carrying the API key (checked after the header)
    #[serde(default = "default_api_key_param")]
    pub api_key_param: String,
    /// Trusted proxy header carrying the client IP chain
    #[serde(default = "default_forwarded_header")]
    pub forwarded_header: String,
}

/// Per-tier limits applied when no rule matches
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierLimits {
    pub per_minute: u64,
    pub per_hour: u64,
    pub per_day: u64,
}

/// Built-in defaults, distinct for anonymous and authenticated callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultLimitsConfig {
    #[serde(default = "default_anonymous_limits")]
    pub anonymous: TierLimits,
    #[serde(default = "default_authenticated_limits")]
    pub authenticated: TierLimits,
}

/// Enforcement behavior on store faults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// Admit requests when a store call fails (fail-open). When false,
    /// store faults surface as 503 to the caller.
    #[serde(default = "default_true")]
    pub fail_open: bool,
    /// Bound on any single store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

/// Retention sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Enable the background sweeper
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval between sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Counters with a window start older than this are deleted
    #[serde(default = "default_counter_horizon")]
    pub counter_horizon_secs: u64,
    /// Request-log rows older than this are deleted
    #[serde(default = "default_log_retention")]
    pub log_retention_secs: u64,
}

/// Redis configuration for the counter store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix for counter keys
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_api_key_param() -> String {
    "api_key".to_string()
}

fn default_forwarded_header() -> String {
    "X-Forwarded-For".to_string()
}

fn default_anonymous_limits() -> TierLimits {
    TierLimits {
        per_minute: 30,
        per_hour: 500,
        per_day: 5000,
    }
}

fn default_authenticated_limits() -> TierLimits {
    TierLimits {
        per_minute: 60,
        per_hour: 1000,
        per_day: 10000,
    }
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_counter_horizon() -> u64 {
    // Two days keeps full day windows around while satisfying the
    // >24h staleness rule for minute/hour rows
    172800
}

fn default_log_retention() -> u64 {
    // 30 days
    2592000
}

fn default_redis_prefix() -> String {
    "quotaguard:counter:".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
            api_key_param: default_api_key_param(),
            forwarded_header: default_forwarded_header(),
        }
    }
}

impl Default for DefaultLimitsConfig {
    fn default() -> Self {
        Self {
            anonymous: default_anonymous_limits(),
            authenticated: default_authenticated_limits(),
        }
    }
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            fail_open: default_true(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            sweep_interval_secs: default_sweep_interval(),
            counter_horizon_secs: default_counter_horizon(),
            log_retention_secs: default_log_retention(),
        }
    }
}

impl LimiterConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LimiterError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, limits) in [
            ("anonymous", &self.defaults.anonymous),
            ("authenticated", &self.defaults.authenticated),
        ] {
            if limits.per_minute == 0 || limits.per_hour == 0 || limits.per_day == 0 {
                return Err(LimiterError::Config(format!(
                    "Default {} limits must be > 0",
                    name
                )));
            }
        }

        if self.retention.sweep_interval_secs == 0 {
            return Err(LimiterError::Config(
                "Sweep interval must be > 0".to_string(),
            ));
        }

        // Minute and hour rows must survive at least a full day
        if self.retention.counter_horizon_secs < 86400 {
            return Err(LimiterError::Config(
                "Counter horizon must be at least 86400 seconds".to_string(),
            ));
        }

        if self.identity.api_key_header.is_empty() || self.identity.forwarded_header.is_empty() {
            return Err(LimiterError::Config(
                "Identity header names cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
