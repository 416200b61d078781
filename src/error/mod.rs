use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for limiter operations
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Limiter error types
#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Access denied")]
    Denied,

    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded {
        /// Seconds until the exhausted window rolls over
        retry_after: u64,
        /// Limit of the exhausted tier
        limit: u64,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(u64),

    #[error("List entry not found: {0}")]
    ListEntryNotFound(u64),

    #[error("Duplicate list entry for identifier: {0}")]
    DuplicateListEntry(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            LimiterError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Denied => StatusCode::FORBIDDEN,
            LimiterError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            LimiterError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LimiterError::RuleNotFound(_) => StatusCode::NOT_FOUND,
            LimiterError::ListEntryNotFound(_) => StatusCode::NOT_FOUND,
            LimiterError::DuplicateListEntry(_) => StatusCode::CONFLICT,
            LimiterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason code for the response body
    pub fn reason_code(&self) -> &'static str {
        match self {
            LimiterError::Config(_) => "config_error",
            LimiterError::Denied => "denied",
            LimiterError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            LimiterError::StoreUnavailable(_) => "store_unavailable",
            LimiterError::RuleNotFound(_) => "rule_not_found",
            LimiterError::ListEntryNotFound(_) => "list_entry_not_found",
            LimiterError::DuplicateListEntry(_) => "duplicate_list_entry",
            LimiterError::Internal(_) => "internal_error",
            LimiterError::Io(_) => "io_error",
        }
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.to_string(),
            "code": self.reason_code(),
            "status": status.as_u16(),
        });

        if let LimiterError::RateLimitExceeded { retry_after, limit } = &self {
            body["retry_after"] = json!(retry_after);
            body["limit"] = json!(limit);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(LimiterError::Denied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            LimiterError::RateLimitExceeded {
                retry_after: 30,
                limit: 60
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            LimiterError::StoreUnavailable("redis down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            LimiterError::RuleNotFound(7).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_error_display() {
        let err = LimiterError::RateLimitExceeded {
            retry_after: 12,
            limit: 60,
        };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded, retry after 12 seconds"
        );
        assert_eq!(err.reason_code(), "rate_limit_exceeded");
    }
}
