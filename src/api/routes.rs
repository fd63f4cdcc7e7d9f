//! Route table for the gateway.

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{
    advisory_completion, alt_model_completion, default_completion, health, metrics_handler,
    provider_b_completion, AppState,
};
use crate::core::middleware::{api_cors_middleware, request_id_middleware, MetricsMiddleware};

/// Largest accepted request body. Context documents can be long.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Build the router with all endpoints and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/completion", post(default_completion))
        .route("/api/completion/default", post(default_completion))
        .route("/api/completion/alt-model", post(alt_model_completion))
        .route("/api/completion/provider-b", post(provider_b_completion))
        .route("/api/completion/google", post(provider_b_completion))
        .route("/api/completion/advisory", post(advisory_completion))
        .route("/api/completion/schools", post(advisory_completion))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(middleware::from_fn(api_cors_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
