//! HTTP surface tests: middleware short-circuits, response headers,
//! and the management API.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use quotaguard::config::LimiterConfig;
use quotaguard::reqlog::RequestLogSink;
use quotaguard::{build_app, LimiterService};
use std::sync::Arc;
use tower::ServiceExt;

async fn app_with_service() -> (axum::Router, Arc<LimiterService>) {
    let service = LimiterService::from_config(&LimiterConfig::default())
        .await
        .unwrap();
    (build_app(service.clone()), service)
}

fn get(uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Forwarded-For", ip)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_admitted_request_carries_rate_limit_headers() {
    let (app, _) = app_with_service().await;

    let response = app.oneshot(get("/v1/projects", "1.2.3.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "30");
    assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "29");
    assert!(headers.contains_key("X-RateLimit-Reset"));
    assert_eq!(headers.get("X-RateLimit-Limit-Hour").unwrap(), "500");
}

#[tokio::test]
async fn test_exhausted_caller_gets_429_with_retry_after() {
    let (app, _) = app_with_service().await;

    for _ in 0..30 {
        let response = app
            .clone()
            .oneshot(get("/v1/projects", "2.3.4.5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.oneshot(get("/v1/projects", "2.3.4.5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = response
        .headers()
        .get("Retry-After")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = body_json(response).await;
    assert_eq!(body["code"], "rate_limit_exceeded");
    assert_eq!(body["status"], 429);
    assert_eq!(body["limit"], 30);
}

#[tokio::test]
async fn test_deny_listed_caller_gets_403() {
    let (app, _) = app_with_service().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/admin/lists",
            serde_json::json!({
                "identifier": "3.4.5.6",
                "identifier_type": "ip",
                "kind": "deny",
                "reason": "abuse",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.oneshot(get("/v1/projects", "3.4.5.6")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], "denied");
}

#[tokio::test]
async fn test_rule_crud_round_trip() {
    let (app, _) = app_with_service().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/admin/rules",
            serde_json::json!({
                "name": "search throttle",
                "endpoint_pattern": "/v1/search",
                "identifier_type": "ip",
                "limit_per_minute": 5,
                "priority": 100,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let rule = body_json(response).await;
    let id = rule["id"].as_u64().unwrap();
    assert_eq!(rule["active"], true);

    // The new rule takes effect on its endpoint
    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(get("/v1/search", "4.5.6.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app
        .clone()
        .oneshot(get("/v1/search", "4.5.6.7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/admin/rules/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(Request::builder().uri("/admin/rules").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let rules = body_json(response).await;
    assert_eq!(rules.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_status_endpoint_is_not_billable() {
    let (app, service) = app_with_service().await;

    let response = app
        .clone()
        .oneshot(get("/v1/projects", "5.6.7.8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get("/limits/status?endpoint=/v1/projects", "5.6.7.8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["identifier"], "ip:5.6.7.8");
    assert_eq!(status["minute"]["used"], 1);
    assert_eq!(status["minute"]["limit"], 30);

    // The status read did not append to the request log
    assert_eq!(service.log.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_analytics_aggregates_request_log() {
    let (app, _) = app_with_service().await;

    for _ in 0..3 {
        app.clone()
            .oneshot(get("/v1/projects", "6.7.8.9"))
            .await
            .unwrap();
    }
    app.clone()
        .oneshot(get("/v1/documents", "6.7.8.9"))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/analytics?top=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let summary = body_json(response).await;
    assert_eq!(summary["total_requests"], 4);
    assert_eq!(summary["top_endpoints"][0][0], "/v1/projects");
    assert_eq!(summary["top_endpoints"][0][1], 3);
    assert_eq!(summary["top_identifiers"][0][0], "ip:6.7.8.9");
}

#[tokio::test]
async fn test_api_key_identity_separates_quota_from_ip() {
    let (app, _) = app_with_service().await;

    // Exhaust the anonymous quota for this IP
    for _ in 0..30 {
        app.clone()
            .oneshot(get("/v1/projects", "7.8.9.1"))
            .await
            .unwrap();
    }
    let response = app
        .clone()
        .oneshot(get("/v1/projects", "7.8.9.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // The same IP with an API key is a different identity with
    // the authenticated default
    let request = Request::builder()
        .uri("/v1/projects")
        .header("X-Forwarded-For", "7.8.9.1")
        .header("X-API-Key", "partner-key")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("X-RateLimit-Limit").unwrap(),
        "60"
    );
}
