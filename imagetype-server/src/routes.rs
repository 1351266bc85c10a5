//! Router configuration module
//!
//! Configures all routes, middleware layers, and creates the application router.

use std::time::Duration;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers::{classify_handler, health, push_handler};
use crate::state::AppState;

/// Create the application router with default config (for testing)
pub fn create_router(state: AppState) -> Router {
    create_router_with_config(state, &Config::default())
}

/// Create the application router with custom configuration
///
/// Routes only accept their declared method; anything else is answered with
/// 405 by axum.
pub fn create_router_with_config(state: AppState, config: &Config) -> Router {
    // Request body limit
    let body_limit = RequestBodyLimitLayer::new(config.body_limit_mb * 1024 * 1024);

    // Request timeout
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    );

    Router::new()
        .route("/classify", post(classify_handler))
        .route("/push", post(push_handler))
        .route("/health", get(health))
        .with_state(state)
        .layer(body_limit)
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
}
