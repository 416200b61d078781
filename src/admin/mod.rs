//! Management surface: policy rules, allow/deny lists, caller status,
//! and aggregate usage analytics.

use crate::error::Result;
use crate::list::{ListEntry, ListEntrySpec, ListKind};
use crate::middleware::resolve_identity;
use crate::policy::{RateRule, RuleSpec};
use crate::report::UsageStatus;
use crate::reqlog::UsageSummary;
use crate::window::unix_now;
use crate::LimiterService;
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Routes for the management and status API
pub fn router(service: Arc<LimiterService>) -> Router {
    Router::new()
        .route("/admin/rules", get(list_rules).post(create_rule))
        .route("/admin/rules/:id", axum::routing::put(update_rule).delete(delete_rule))
        .route("/admin/lists", get(list_entries).post(add_entry))
        .route("/admin/lists/:id", delete(remove_entry))
        .route("/admin/analytics", get(analytics))
        .route("/limits/status", get(caller_status))
        .with_state(service)
}

async fn list_rules(State(service): State<Arc<LimiterService>>) -> Result<Json<Vec<RateRule>>> {
    Ok(Json(service.policies.list().await?))
}

async fn create_rule(
    State(service): State<Arc<LimiterService>>,
    Json(spec): Json<RuleSpec>,
) -> Result<(StatusCode, Json<RateRule>)> {
    let rule = service.policies.create(spec).await?;
    info!(rule_id = rule.id, name = %rule.name, "Rule created");
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(service): State<Arc<LimiterService>>,
    Path(id): Path<u64>,
    Json(spec): Json<RuleSpec>,
) -> Result<Json<RateRule>> {
    let rule = service.policies.update(id, spec).await?;
    info!(rule_id = rule.id, "Rule updated");
    Ok(Json(rule))
}

async fn delete_rule(
    State(service): State<Arc<LimiterService>>,
    Path(id): Path<u64>,
) -> Result<StatusCode> {
    service.policies.delete(id).await?;
    info!(rule_id = id, "Rule deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    kind: Option<ListKind>,
}

async fn list_entries(
    State(service): State<Arc<LimiterService>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ListEntry>>> {
    Ok(Json(service.lists.list(query.kind).await?))
}

async fn add_entry(
    State(service): State<Arc<LimiterService>>,
    Json(spec): Json<ListEntrySpec>,
) -> Result<(StatusCode, Json<ListEntry>)> {
    let entry = service.lists.add(spec, unix_now()).await?;
    info!(
        entry_id = entry.id,
        identifier = %entry.identifier,
        kind = ?entry.kind,
        "List entry added"
    );
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn remove_entry(
    State(service): State<Arc<LimiterService>>,
    Path(id): Path<u64>,
) -> Result<StatusCode> {
    service.lists.remove(id).await?;
    info!(entry_id = id, "List entry removed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    #[serde(default = "default_top")]
    top: usize,
}

fn default_top() -> usize {
    10
}

async fn analytics(
    State(service): State<Arc<LimiterService>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<UsageSummary>> {
    Ok(Json(service.log.summarize(query.top).await?))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default = "default_endpoint")]
    endpoint: String,
}

fn default_endpoint() -> String {
    "/".to_string()
}

/// Current usage for the caller, without counting as a billable call
async fn caller_status(
    State(service): State<Arc<LimiterService>>,
    Query(query): Query<StatusQuery>,
    request: Request,
) -> Result<Json<UsageStatus>> {
    let (identity, role) = resolve_identity(&service, &request);
    let status = service
        .reporter
        .status(&identity, role.as_deref(), &query.endpoint, unix_now())
        .await?;
    Ok(Json(status))
}
