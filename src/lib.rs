pub mod admin;
pub mod config;
pub mod counter;
pub mod engine;
pub mod error;
pub mod identity;
pub mod list;
pub mod middleware;
pub mod policy;
pub mod reqlog;
pub mod report;
pub mod sweeper;
pub mod window;

use crate::config::LimiterConfig;
use crate::counter::{CounterStore, MemoryCounterStore, RedisCounterStore};
use crate::engine::EnforcementEngine;
use crate::error::Result;
use crate::identity::IdentityResolver;
use crate::list::{ListStore, MemoryListStore};
use crate::policy::{MemoryPolicyStore, PolicyResolver, PolicyStore};
use crate::report::UsageReporter;
use crate::reqlog::{MemoryRequestLog, RequestLogSink};
use crate::sweeper::RetentionSweeper;
use axum::{middleware::from_fn_with_state, routing::any, Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// One limiter instance per process: the enforcement engine, the usage
/// reporter, and the store handles they share, constructed once at startup
/// and handed by reference to the request-handling layer.
pub struct LimiterService {
    pub identity: IdentityResolver,
    pub engine: EnforcementEngine,
    pub reporter: UsageReporter,
    pub policies: Arc<dyn PolicyStore>,
    pub lists: Arc<dyn ListStore>,
    pub counters: Arc<dyn CounterStore>,
    pub log: Arc<dyn RequestLogSink>,
}

impl LimiterService {
    /// Build the service and its stores from configuration
    pub async fn from_config(config: &LimiterConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let counters: Arc<dyn CounterStore> = match &config.redis {
            Some(redis) => {
                info!("Using Redis counter store");
                Arc::new(RedisCounterStore::new(redis).await?)
            }
            None => {
                info!("Using in-memory counter store");
                Arc::new(MemoryCounterStore::new())
            }
        };

        let policies: Arc<dyn PolicyStore> = Arc::new(MemoryPolicyStore::new());
        let lists: Arc<dyn ListStore> = Arc::new(MemoryListStore::new());
        let log: Arc<dyn RequestLogSink> = Arc::new(MemoryRequestLog::new());

        let resolver = Arc::new(PolicyResolver::new(
            policies.clone(),
            config.defaults.clone(),
        ));

        Ok(Arc::new(Self {
            identity: IdentityResolver::new(config.identity.clone()),
            engine: EnforcementEngine::new(
                resolver.clone(),
                counters.clone(),
                lists.clone(),
                log.clone(),
                &config.enforcement,
            ),
            reporter: UsageReporter::new(resolver, counters.clone()),
            policies,
            lists,
            counters,
            log,
        }))
    }

    /// Start the retention sweeper for this service's stores
    pub fn start_sweeper(self: &Arc<Self>, config: &LimiterConfig) {
        Arc::new(RetentionSweeper::new(
            self.counters.clone(),
            self.lists.clone(),
            self.log.clone(),
            config.retention.clone(),
        ))
        .start();
    }
}

/// Assemble the axum application: the management/status API plus a
/// catch-all protected handler wrapped in the enforcement middleware.
/// The catch-all stands in for the host dispatcher's endpoint handlers.
pub fn build_app(service: Arc<LimiterService>) -> Router {
    let protected = Router::new()
        .route("/*path", any(protected_handler))
        .layer(from_fn_with_state(
            service.clone(),
            middleware::enforcement_middleware,
        ));

    admin::router(service)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
}

async fn protected_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Initialize the limiter service and serve it
pub async fn run(config: LimiterConfig) -> Result<()> {
    let service = LimiterService::from_config(&config).await?;
    service.start_sweeper(&config);

    let app = build_app(service)
        .into_make_service_with_connect_info::<std::net::SocketAddr>();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(crate::error::LimiterError::Io)?;

    info!("Limiter listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::LimiterError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotaguard=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
