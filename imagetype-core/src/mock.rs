//! In-memory service fakes for tests.
//!
//! Every fake records the calls it receives so tests can assert on exactly
//! what the pipeline did. Do not use outside tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RowError, UpstreamError};
use crate::label::ImageType;
use crate::processed::FileRef;
use crate::services::{
    FetchedImage, GenerateRequest, HttpTask, ImageFetcher, InferenceProvider, Row, SqlQuery,
    TaskQueue, Warehouse,
};

fn failure(message: &str) -> UpstreamError {
    UpstreamError::Status {
        service: "mock",
        status: 500,
        body: message.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serves images from memory; unknown URLs answer 404.
#[derive(Default)]
pub struct MockImageFetcher {
    images: HashMap<String, FetchedImage>,
    fetched: Mutex<Vec<String>>,
}

impl MockImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, url: &str, bytes: Vec<u8>, content_type: &str) -> Self {
        self.images.insert(
            url.to_string(),
            FetchedImage {
                bytes,
                content_type: Some(content_type.to_string()),
            },
        );
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        lock(&self.fetched).clone()
    }
}

#[async_trait]
impl ImageFetcher for MockImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, UpstreamError> {
        lock(&self.fetched).push(url.to_string());
        self.images.get(url).cloned().ok_or(UpstreamError::Status {
            service: "image host",
            status: 404,
            body: "not found".to_string(),
        })
    }
}

/// How [`MockInference`] answers `generate`.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// One label of this type per submitted file.
    LabelEach(ImageType),
    /// This exact response text.
    Text(String),
    /// Fail the request.
    Fail(String),
    /// Never answer.
    Hang,
}

/// Fake file store + model.
pub struct MockInference {
    reply: MockReply,
    fail_upload_at: Option<usize>,
    fail_delete: bool,
    uploaded: Mutex<Vec<FileRef>>,
    deleted: Mutex<Vec<FileRef>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl MockInference {
    pub fn new(reply: MockReply) -> Self {
        Self {
            reply,
            fail_upload_at: None,
            fail_delete: false,
            uploaded: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn labeling(image_type: ImageType) -> Self {
        Self::new(MockReply::LabelEach(image_type))
    }

    /// Fail the upload with this zero-based index.
    pub fn fail_upload_at(mut self, index: usize) -> Self {
        self.fail_upload_at = Some(index);
        self
    }

    pub fn fail_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn uploaded(&self) -> Vec<FileRef> {
        lock(&self.uploaded).clone()
    }

    /// Delete calls received, in order (including failed ones).
    pub fn deleted(&self) -> Vec<FileRef> {
        lock(&self.deleted).clone()
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl InferenceProvider for MockInference {
    async fn upload_file(&self, bytes: Vec<u8>, mime_type: &str) -> Result<FileRef, UpstreamError> {
        let mut uploaded = lock(&self.uploaded);
        let index = uploaded.len();
        if self.fail_upload_at == Some(index) {
            return Err(failure("upload rejected"));
        }
        let file = FileRef {
            name: format!("files/mock-{index}"),
            uri: format!("https://mock.files/mock-{index}?bytes={}", bytes.len()),
            mime_type: mime_type.to_string(),
        };
        uploaded.push(file.clone());
        Ok(file)
    }

    async fn delete_file(&self, file: &FileRef) -> Result<(), UpstreamError> {
        lock(&self.deleted).push(file.clone());
        if self.fail_delete {
            return Err(failure("delete rejected"));
        }
        Ok(())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, UpstreamError> {
        lock(&self.requests).push(request.clone());
        match &self.reply {
            MockReply::LabelEach(image_type) => {
                let labels: Vec<Value> = request
                    .files
                    .iter()
                    .map(|_| serde_json::json!({"type": image_type}))
                    .collect();
                Ok(Value::Array(labels).to_string())
            }
            MockReply::Text(text) => Ok(text.clone()),
            MockReply::Fail(message) => Err(failure(message)),
            MockReply::Hang => std::future::pending().await,
        }
    }
}

/// Fake warehouse returning canned query rows and insert results.
#[derive(Default)]
pub struct MockWarehouse {
    rows: Vec<Row>,
    fail_query: bool,
    fail_insert: bool,
    row_errors: Vec<RowError>,
    queries: Mutex<Vec<SqlQuery>>,
    inserts: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by every query. Each value must be a JSON object.
    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self
    }

    pub fn fail_query(mut self) -> Self {
        self.fail_query = true;
        self
    }

    pub fn fail_insert(mut self) -> Self {
        self.fail_insert = true;
        self
    }

    pub fn with_row_errors(mut self, errors: Vec<RowError>) -> Self {
        self.row_errors = errors;
        self
    }

    pub fn queries(&self) -> Vec<SqlQuery> {
        lock(&self.queries).clone()
    }

    /// `(table_id, rows)` per insert call.
    pub fn inserts(&self) -> Vec<(String, Vec<Value>)> {
        lock(&self.inserts).clone()
    }
}

#[async_trait]
impl Warehouse for MockWarehouse {
    async fn query(&self, query: &SqlQuery) -> Result<Vec<Row>, UpstreamError> {
        lock(&self.queries).push(query.clone());
        if self.fail_query {
            return Err(failure("query failed"));
        }
        Ok(self.rows.clone())
    }

    async fn insert_rows(&self, table_id: &str, rows: Vec<Value>) -> Result<Vec<RowError>, UpstreamError> {
        lock(&self.inserts).push((table_id.to_string(), rows));
        if self.fail_insert {
            return Err(failure("insert failed"));
        }
        Ok(self.row_errors.clone())
    }
}

/// Fake queue holding a number of pending tasks.
#[derive(Default)]
pub struct MockTaskQueue {
    pending: Vec<String>,
    fail_list: bool,
    fail_path: bool,
    /// Zero-based create calls that fail.
    fail_creates: HashSet<usize>,
    list_calls: Mutex<Vec<(String, u32)>>,
    create_calls: Mutex<Vec<(String, HttpTask)>>,
}

impl MockTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending(mut self, count: usize) -> Self {
        self.pending = (0..count).map(|i| format!("tasks/pending-{i}")).collect();
        self
    }

    pub fn fail_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn fail_path(mut self) -> Self {
        self.fail_path = true;
        self
    }

    pub fn fail_create_at(mut self, index: usize) -> Self {
        self.fail_creates.insert(index);
        self
    }

    /// `(parent, page_size)` per list call.
    pub fn list_calls(&self) -> Vec<(String, u32)> {
        lock(&self.list_calls).clone()
    }

    /// `(parent, task)` per create call, failed ones included.
    pub fn create_calls(&self) -> Vec<(String, HttpTask)> {
        lock(&self.create_calls).clone()
    }
}

#[async_trait]
impl TaskQueue for MockTaskQueue {
    fn queue_path(&self, project: &str, location: &str, queue: &str) -> Result<String, UpstreamError> {
        if self.fail_path {
            return Err(failure("queue not found"));
        }
        crate::services::queue_path(project, location, queue)
    }

    async fn list_tasks(&self, parent: &str, page_size: u32) -> Result<Vec<String>, UpstreamError> {
        lock(&self.list_calls).push((parent.to_string(), page_size));
        if self.fail_list {
            return Err(failure("list failed"));
        }
        Ok(self
            .pending
            .iter()
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn create_task(&self, parent: &str, task: &HttpTask) -> Result<String, UpstreamError> {
        let mut calls = lock(&self.create_calls);
        let index = calls.len();
        calls.push((parent.to_string(), task.clone()));
        if self.fail_creates.contains(&index) {
            return Err(failure("create failed"));
        }
        Ok(format!("{parent}/tasks/task-{index}"))
    }
}
