//! API error handling module
//!
//! Provides a unified error type for all API endpoints. Pipeline failures map
//! to 5xx so the task queue redelivers the work item. Malformed requests get a
//! plain-text body; every other error is JSON `{error, code}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use imagetype_core::{ClassifyError, DistributeError};
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// Body is not declared as JSON
    #[error("Unsupported Media Type")]
    UnsupportedMediaType,

    /// Service unavailable - the flow behind this endpoint is not configured
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Classification of a product failed
    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifyError),

    /// Distribution run failed
    #[error("Distribution failed: {0}")]
    Distribute(#[from] DistributeError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Classify(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Distribute(e) => match e {
                DistributeError::Filter(_) => StatusCode::BAD_REQUEST,
                DistributeError::SourceRead(_)
                | DistributeError::QueuePublish(_)
                | DistributeError::QueueNotEmpty => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Classify(e) => match e {
                ClassifyError::ImageFetch { .. } => "IMAGE_FETCH_FAILED",
                ClassifyError::Upload { .. } => "UPLOAD_FAILED",
                ClassifyError::Inference(_) => "INFERENCE_FAILED",
                ClassifyError::Persist(_) => "PERSIST_FAILED",
            },
            Self::Distribute(e) => match e {
                DistributeError::SourceRead(_) => "SOURCE_READ_FAILED",
                DistributeError::QueuePublish(_) => "QUEUE_ERROR",
                DistributeError::QueueNotEmpty => "QUEUE_NOT_EMPTY",
                DistributeError::Filter(_) => "INVALID_FILTER",
            },
        }
    }

    fn is_plain_text(&self) -> bool {
        matches!(self, Self::BadRequest(_) | Self::UnsupportedMediaType)
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) | Self::UnsupportedMediaType => "bad_request",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Classify(_) => "classify",
            Self::Distribute(_) => "distribute",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %message,
                "Server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %message,
                "Client error"
            );
        }

        // Task-handler rejections keep the plain-text body the queue logs.
        if self.is_plain_text() {
            return (status, message).into_response();
        }

        let body = serde_json::json!({
            "error": message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagetype_core::{FilterError, InferenceFailure};

    #[test]
    fn test_queue_not_empty_is_server_error() {
        let err = ApiError::from(DistributeError::QueueNotEmpty);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "QUEUE_NOT_EMPTY");
    }

    #[test]
    fn test_filter_error_is_client_error() {
        let err = ApiError::from(DistributeError::Filter(FilterError::Empty));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_classify_errors_request_redelivery() {
        let err = ApiError::from(ClassifyError::Inference(InferenceFailure::CountMismatch {
            submitted: 2,
            returned: 1,
        }));
        assert!(err.status_code().is_server_error());
        assert_eq!(err.error_code(), "INFERENCE_FAILED");
    }

    #[test]
    fn test_malformed_requests_are_plain_text() {
        assert!(ApiError::bad_request("x").is_plain_text());
        assert!(ApiError::UnsupportedMediaType.is_plain_text());
        assert!(!ApiError::from(DistributeError::QueueNotEmpty).is_plain_text());
        assert!(!ApiError::from(DistributeError::Filter(FilterError::Empty)).is_plain_text());
    }

    #[test]
    fn test_bad_request_message() {
        let err = ApiError::bad_request("No JSON data provided");
        assert_eq!(err.to_string(), "Bad Request: No JSON data provided");
    }
}
