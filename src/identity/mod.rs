//! Caller identity resolution.
//!
//! Every request is keyed by exactly one identity, chosen in priority order:
//! API key, then authenticated user, then client IP. An API key always wins,
//! even for a logged-in caller.

use crate::config::IdentityConfig;
use axum::http::HeaderMap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use tracing::debug;

/// Sentinel used when no valid client IP can be determined
const UNKNOWN_IP: &str = "0.0.0.0";

/// Identity class - which kind of caller key was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityClass {
    ApiKey,
    User,
    Ip,
}

impl IdentityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityClass::ApiKey => "api_key",
            IdentityClass::User => "user",
            IdentityClass::Ip => "ip",
        }
    }
}

/// Resolved caller identity, used as the key prefix for counters and lists
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Prefixed key value, e.g. `key:abc123`, `user:42`, `ip:1.2.3.4`
    pub value: String,
    /// Which class was chosen
    pub class: IdentityClass,
}

impl Identity {
    pub fn api_key(key: &str) -> Self {
        Self {
            value: format!("key:{}", key),
            class: IdentityClass::ApiKey,
        }
    }

    pub fn user(user_id: &str) -> Self {
        Self {
            value: format!("user:{}", user_id),
            class: IdentityClass::User,
        }
    }

    pub fn ip(ip: &str) -> Self {
        Self {
            value: format!("ip:{}", ip),
            class: IdentityClass::Ip,
        }
    }

    /// Whether the caller carries credentials (API key or session)
    pub fn is_authenticated(&self) -> bool {
        self.class != IdentityClass::Ip
    }
}

/// Authenticated-session state, injected by the host dispatcher
/// as a request extension
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: String,
    pub role: Option<String>,
}

/// Identifier resolver
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    /// Derive the caller identity from request metadata.
    ///
    /// Never fails: an undeterminable client IP resolves to the
    /// `0.0.0.0` sentinel rather than failing the request.
    pub fn resolve(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
        session: Option<&SessionUser>,
        peer_ip: Option<IpAddr>,
    ) -> Identity {
        if let Some(key) = self.extract_api_key(headers, query) {
            return Identity::api_key(&key);
        }

        if let Some(session) = session {
            return Identity::user(&session.user_id);
        }

        let ip = self
            .extract_client_ip(headers, peer_ip)
            .unwrap_or_else(|| {
                debug!("No valid client IP, using sentinel");
                UNKNOWN_IP.to_string()
            });
        Identity::ip(&ip)
    }

    /// API key from the configured header, then the query parameter
    fn extract_api_key(&self, headers: &HeaderMap, query: Option<&str>) -> Option<String> {
        if let Some(value) = headers
            .get(&self.config.api_key_header)
            .and_then(|v| v.to_str().ok())
        {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }

        query.and_then(|q| query_param(q, &self.config.api_key_param))
    }

    /// Client IP from the first hop of the trusted proxy header,
    /// falling back to the socket peer address
    fn extract_client_ip(&self, headers: &HeaderMap, peer_ip: Option<IpAddr>) -> Option<String> {
        if let Some(forwarded) = headers
            .get(&self.config.forwarded_header)
            .and_then(|v| v.to_str().ok())
        {
            let first_hop = forwarded.split(',').next().unwrap_or("").trim();
            if IpAddr::from_str(first_hop).is_ok() {
                return Some(first_hop.to_string());
            }
            debug!(value = %first_hop, "Invalid IP in forwarded header, falling back to peer");
        }

        peer_ip.map(|ip| ip.to_string())
    }
}

/// Look up a parameter in a raw query string. The value is
/// percent-decoded so a key arrives identical to its header form.
fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k != name || v.is_empty() {
            return None;
        }
        percent_decode_str(v)
            .decode_utf8()
            .ok()
            .map(|decoded| decoded.into_owned())
    })
}
