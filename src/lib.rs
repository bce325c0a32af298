pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;

use crate::config::{GuardConfig, StoreBackend};
use crate::error::{GuardError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::{
    Clock, CounterStore, MemoryStore, RateLimitGuard, RateLimiterService, RedisStore, SystemClock,
};
use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Connect the configured counter store
pub async fn init_store(config: &GuardConfig) -> Result<Arc<dyn CounterStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-process counter store");
            let store = Arc::new(MemoryStore::new());
            let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
            store.spawn_sweeper(clock, Duration::from_secs(config.store.sweep_interval_secs));
            Ok(store)
        }
        StoreBackend::Redis => {
            let url = config
                .store
                .url
                .as_deref()
                .ok_or_else(|| GuardError::Config("Redis store requires a url".to_string()))?;
            let store = RedisStore::connect(url).await?;

            match store.ping().await {
                Ok(_) => info!("Redis connection successful"),
                Err(e) => warn!("Redis ping failed: {}, checks will fail until it recovers", e),
            }
            Ok(Arc::new(store))
        }
    }
}

/// Validate configuration and assemble the guard
pub async fn init_guard(config: &GuardConfig) -> Result<RateLimitGuard> {
    config.validate()?;

    let store = init_store(config).await?;
    let service = RateLimiterService::builder(config.rate_limit.clone())
        .store(store)
        .registry(config.registry()?)
        .build()?;

    RateLimitGuard::new(Arc::new(service), &config.rate_limit)
}

/// Build the demo application: every configured route answered by a stub
/// handler behind the guard, plus unguarded `/health`.
pub fn build_app(config: &GuardConfig, guard: RateLimitGuard) -> Router {
    let paths: BTreeSet<&str> = config.routes.iter().map(|r| r.path.as_str()).collect();

    let service = guard.service().clone();

    // route_layer panics on a router without routes
    let guarded = if paths.is_empty() {
        Router::new()
    } else {
        let routes = paths
            .into_iter()
            .fold(Router::new(), |router, path| router.route(path, any(stub_handler)));
        guard.install(routes)
    };

    guarded
        .merge(
            Router::new()
                .route("/health", get(health_handler))
                .with_state(service),
        )
        .layer(TraceLayer::new_for_http())
}

async fn stub_handler(method: Method, uri: Uri) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "method": method.as_str(),
        "path": uri.path(),
    }))
}

async fn health_handler(State(service): State<Arc<RateLimiterService>>) -> impl IntoResponse {
    match service.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "healthy" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "error": e.to_string() })),
        ),
    }
}

/// Initialize the guard server
pub async fn run(config: GuardConfig) -> Result<()> {
    info!("Starting quota guard");

    let guard = init_guard(&config).await?;
    info!(
        "Loaded {} scopes and {} routes (algorithm: {})",
        config.scopes.len(),
        config.routes.len(),
        guard.service().algorithm()
    );

    let metrics = MetricsService::new()?;
    let app = build_app(&config, guard).merge(
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(metrics),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| GuardError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Initialize tracing/logging
pub fn init_tracing(json_logs: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quota_guard=debug,tower_http=debug".into());

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}
