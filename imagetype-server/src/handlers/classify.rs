//! Task handler
//!
//! Handles POST /classify requests delivered by the work queue: one product
//! per request, classified and persisted before the response is sent.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use imagetype_core::Product;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::{parse_json_body, validate_json_content_type};

/// Classify the images of the product carried in the request body
///
/// Returns 200 `OK` once every image row is written. Any pipeline failure is a
/// 500 so the queue delivers the task again.
pub async fn classify_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ApiError> {
    validate_json_content_type(&headers)?;
    let product: Product = parse_json_body(&body)?;

    let classifier = state
        .classifier
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("classifier is not configured"))?;

    tracing::info!(offer_id = %product.offer_id, "Processing product");
    classifier.process(&product).await?;

    Ok((StatusCode::OK, "OK"))
}
