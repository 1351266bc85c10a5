//! Boundaries to the external systems the pipeline talks to.
//!
//! Each boundary is a trait so the classifier and distributor can be driven by
//! the in-memory fakes in [`crate::mock`] in tests:
//!
//! - [`ImageFetcher`] - HTTP download of product images
//! - [`InferenceProvider`] - Gemini file store and multimodal generation
//! - [`Warehouse`] - BigQuery queries and streaming inserts
//! - [`TaskQueue`] - Cloud Tasks queue listing and task creation

mod auth;
mod bigquery;
mod cloud_tasks;
mod gemini;
mod http;

pub use auth::{MetadataServerToken, StaticToken, TokenSource};
pub use bigquery::BigQueryClient;
pub use cloud_tasks::CloudTasksClient;
pub use gemini::{GeminiClient, GeminiConfig};
pub use http::{HttpImageFetcher, USER_AGENT};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{RowError, UpstreamError};
use crate::processed::FileRef;

/// Raw bytes of a downloaded image.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// `Content-Type` reported by the image host.
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Download `url`; non-success statuses are errors.
    async fn fetch(&self, url: &str) -> Result<FetchedImage, UpstreamError>;
}

/// Decoding parameters for a generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub response_mime_type: String,
    pub response_schema: Value,
}

impl GenerationConfig {
    /// Deterministic-leaning JSON output constrained to `response_schema`.
    pub fn structured(response_schema: Value) -> Self {
        Self {
            temperature: 0.0,
            top_k: 1,
            top_p: 0.2,
            response_mime_type: "application/json".to_string(),
            response_schema,
        }
    }
}

/// One multimodal request: file parts in order, then the text prompt.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub files: Vec<FileRef>,
    pub prompt: String,
    pub config: GenerationConfig,
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Store `bytes` in the provider's file store.
    async fn upload_file(&self, bytes: Vec<u8>, mime_type: &str) -> Result<FileRef, UpstreamError>;

    /// Release a previously uploaded file.
    async fn delete_file(&self, file: &FileRef) -> Result<(), UpstreamError>;

    /// Run the request and return the model's raw response text.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, UpstreamError>;
}

/// Value bound to a named query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    String(String),
    Int64(i64),
    StringArray(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub name: String,
    pub value: ParamValue,
}

/// Standard SQL with named (`@name`) parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl SqlQuery {
    pub fn bind(&mut self, name: &str, value: ParamValue) {
        self.params.push(QueryParam {
            name: name.to_string(),
            value,
        });
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }
}

/// Result row keyed by column name, with values already converted to their
/// column types.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn query(&self, query: &SqlQuery) -> Result<Vec<Row>, UpstreamError>;

    /// Stream `rows` into `table_id` (`project.dataset.table`).
    ///
    /// Returns the row-level rejections; an empty list means every row was
    /// accepted.
    async fn insert_rows(&self, table_id: &str, rows: Vec<Value>) -> Result<Vec<RowError>, UpstreamError>;
}

/// An HTTP POST the queue delivers to a worker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTask {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpTask {
    pub fn json(url: &str, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            headers: vec![("Content-type".to_string(), "application/json".to_string())],
            body,
        }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Fully qualified queue name. Fails when an id cannot form a valid path.
    fn queue_path(&self, project: &str, location: &str, queue: &str) -> Result<String, UpstreamError> {
        queue_path(project, location, queue)
    }

    /// List up to `page_size` pending task names (a single page).
    async fn list_tasks(&self, parent: &str, page_size: u32) -> Result<Vec<String>, UpstreamError>;

    /// Create a task on `parent`, returning the task name.
    async fn create_task(&self, parent: &str, task: &HttpTask) -> Result<String, UpstreamError>;
}

/// `projects/{project}/locations/{location}/queues/{queue}`
pub fn queue_path(project: &str, location: &str, queue: &str) -> Result<String, UpstreamError> {
    for (label, id) in [("project", project), ("location", location), ("queue", queue)] {
        if id.trim().is_empty() || id.contains('/') {
            return Err(UpstreamError::decode(format!("invalid {label} id: {id:?}")));
        }
    }
    Ok(format!("projects/{project}/locations/{location}/queues/{queue}"))
}

/// Turn a non-success response into [`UpstreamError::Status`], keeping the body
/// for diagnosis.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(service, status = %status, "Upstream returned error status");
    Err(UpstreamError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_path_format() {
        assert_eq!(
            queue_path("proj", "europe-west1", "products").unwrap(),
            "projects/proj/locations/europe-west1/queues/products"
        );
    }

    #[test]
    fn test_queue_path_rejects_bad_ids() {
        assert!(queue_path("", "us", "q").is_err());
        assert!(queue_path("p", "us/central", "q").is_err());
    }

    #[test]
    fn test_generation_config_is_deterministic_leaning() {
        let config = GenerationConfig::structured(Value::Null);
        assert_eq!(config.top_k, 1);
        assert!((config.top_p - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.response_mime_type, "application/json");
    }

    #[test]
    fn test_json_task_sets_content_type() {
        let task = HttpTask::json("https://worker/classify", b"{}".to_vec());
        assert_eq!(
            task.headers,
            vec![("Content-type".to_string(), "application/json".to_string())]
        );
    }
}
