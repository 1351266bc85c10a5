use thiserror::Error;

use crate::product::FilterError;

/// Failure talking to one of the external services (image host, Gemini,
/// BigQuery, Cloud Tasks, metadata server).
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl UpstreamError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}

/// Why the batched multimodal request did not yield one label per image.
#[derive(Error, Debug)]
pub enum InferenceFailure {
    #[error("model request failed: {0}")]
    Request(#[source] UpstreamError),

    #[error("model response is not a valid label list: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("model returned {returned} labels for {submitted} images")]
    CountMismatch { submitted: usize, returned: usize },

    #[error("image {index} has no uploaded file reference")]
    MissingFile { index: usize },
}

/// Errors raised while classifying a single product.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Failed to fetch image {url}: {source}")]
    ImageFetch {
        url: String,
        #[source]
        source: UpstreamError,
    },

    #[error("Failed to upload image {url}: {source}")]
    Upload {
        url: String,
        #[source]
        source: UpstreamError,
    },

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceFailure),

    #[error("Persist error: {0}")]
    Persist(#[from] PersistFailure),
}

/// Why a warehouse bulk insert failed.
#[derive(Error, Debug)]
pub enum PersistFailure {
    #[error("insert request failed: {0}")]
    Request(#[source] UpstreamError),

    #[error("{} row(s) rejected: {}", .0.len(), summarize_row_errors(.0))]
    RowErrors(Vec<RowError>),

    #[error("image {image_link} has not been labeled")]
    Unlabeled { image_link: String },

    #[error("failed to serialize row: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A row-level rejection reported by the warehouse insert call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RowError {
    pub index: usize,
    pub reason: String,
    pub message: String,
}

fn summarize_row_errors(errors: &[RowError]) -> String {
    errors
        .iter()
        .map(|e| format!("row {}: {} ({})", e.index, e.message, e.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by a distribution run.
#[derive(Error, Debug)]
pub enum DistributeError {
    #[error("Failed to read candidate products: {0}")]
    SourceRead(#[source] UpstreamError),

    #[error("Queue operation failed: {0}")]
    QueuePublish(#[source] UpstreamError),

    #[error("Queue is not empty, refusing to enqueue duplicate tasks")]
    QueueNotEmpty,

    #[error("Invalid filter: {0}")]
    Filter(#[from] FilterError),
}

pub type Result<T, E = ClassifyError> = std::result::Result<T, E>;
