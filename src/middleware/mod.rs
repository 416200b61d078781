//! Enforcement middleware: the pre/post dispatch hook points.
//!
//! Before the matched handler runs, the caller identity is resolved and the
//! enforcement engine evaluates the request; a deny or an exhausted tier
//! short-circuits with 403/429. After the handler produces a response, the
//! usage reporter attaches `X-RateLimit-*` metadata.

use crate::engine::Decision;
use crate::error::LimiterError;
use crate::identity::{Identity, SessionUser};
use crate::report::apply_rate_limit_headers;
use crate::window::unix_now;
use crate::LimiterService;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Resolve the caller identity from request metadata
pub fn resolve_identity(service: &LimiterService, request: &Request) -> (Identity, Option<String>) {
    let session = request.extensions().get::<SessionUser>();
    let peer_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());

    let identity = service.identity.resolve(
        request.headers(),
        request.uri().query(),
        session,
        peer_ip,
    );
    let role = session.and_then(|s| s.role.clone());
    (identity, role)
}

/// Axum middleware applying enforcement around the inner handler
pub async fn enforcement_middleware(
    State(service): State<Arc<LimiterService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let (identity, role) = resolve_identity(&service, &request);
    let endpoint = request.uri().path().to_string();

    let decision = match service
        .engine
        .check(&identity, role.as_deref(), &endpoint)
        .await
    {
        Ok(decision) => decision,
        Err(e) => return e.into_response(),
    };

    match decision {
        Decision::Denied => LimiterError::Denied.into_response(),
        Decision::Blocked {
            limit, retry_after, ..
        } => blocked_response(limit, retry_after),
        Decision::Admitted | Decision::Bypassed => {
            debug!(identity = %identity.value, endpoint = %endpoint, ?decision, "Request admitted");
            request.extensions_mut().insert(identity.clone());

            let mut response = next.run(request).await;
            // Metadata is informational; a reporter fault leaves it off
            if let Ok(status) = service
                .reporter
                .status(&identity, role.as_deref(), &endpoint, unix_now())
                .await
            {
                apply_rate_limit_headers(response.headers_mut(), &status);
            }
            response
        }
    }
}

/// 429 response carrying the exhausted tier's limit and retry-after
fn blocked_response(limit: u64, retry_after: u64) -> Response {
    let mut response = LimiterError::RateLimitExceeded { retry_after, limit }.into_response();

    let headers = response.headers_mut();
    insert_numeric(headers, "Retry-After", retry_after);
    insert_numeric(headers, "X-RateLimit-Limit", limit);
    insert_numeric(headers, "X-RateLimit-Remaining", 0);
    insert_numeric(headers, "X-RateLimit-Reset", unix_now() + retry_after);

    response
}

fn insert_numeric(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_blocked_response_shape() {
        let response = blocked_response(60, 30);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("Retry-After").unwrap(), "30");
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "60");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
    }
}
