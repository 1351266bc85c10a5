//! Distributor trigger
//!
//! Handles POST /push requests, typically sent by a scheduler, to run one
//! distribution pass.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use imagetype_core::{CandidateView, ProductFilter, RunOutcome, DEFAULT_PRODUCT_LIMIT};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::{parse_json_body, validate_json_content_type};

/// Optional parameters of a distribution run
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct PushRequest {
    #[serde(default = "default_limit")]
    pub product_limit: u32,
    #[serde(default)]
    pub view: CandidateView,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub brands: Vec<String>,
    #[serde(default)]
    pub offer_ids: Vec<String>,
}

fn default_limit() -> u32 {
    DEFAULT_PRODUCT_LIMIT
}

impl Default for PushRequest {
    fn default() -> Self {
        Self {
            product_limit: DEFAULT_PRODUCT_LIMIT,
            view: CandidateView::default(),
            product_type: None,
            brands: Vec::new(),
            offer_ids: Vec::new(),
        }
    }
}

impl PushRequest {
    /// `None` when no criterion was sent at all; otherwise the validated filter.
    pub fn filter(&self) -> Result<Option<ProductFilter>, ApiError> {
        if self.product_type.is_none() && self.brands.is_empty() && self.offer_ids.is_empty() {
            return Ok(None);
        }
        let filter = ProductFilter::new(
            self.product_type.clone(),
            self.brands.clone(),
            self.offer_ids.clone(),
        )
        .map_err(imagetype_core::DistributeError::from)?;
        Ok(Some(filter))
    }
}

/// Run the distributor once
///
/// The body is optional; without one the defaults apply (10 products from the
/// new-products view, unfiltered).
pub async fn push_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        PushRequest::default()
    } else {
        validate_json_content_type(&headers)?;
        parse_json_body(&body)?
    };
    let filter = request.filter()?;

    let distributor = state
        .distributor
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("distributor is not configured"))?;

    match distributor
        .run(request.product_limit, filter.as_ref(), request.view)
        .await?
    {
        RunOutcome::NothingToDo => {}
        RunOutcome::Enqueued(report) => {
            tracing::info!(
                succeeded = report.succeeded,
                failed = report.failed,
                "Distribution run finished"
            );
        }
    }

    Ok((StatusCode::OK, "OK"))
}
