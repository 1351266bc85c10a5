//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// "healthy" when at least one flow is configured, else "degraded"
    pub status: &'static str,
    /// Server version from Cargo.toml
    pub version: &'static str,
    pub classifier: bool,
    pub distributor: bool,
    /// Service name
    pub service: &'static str,
}

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let classifier = state.classifier.is_some();
    let distributor = state.distributor.is_some();

    let status = if classifier || distributor {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        classifier,
        distributor,
        service: "imagetype-server",
    })
}
