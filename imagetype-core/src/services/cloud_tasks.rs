//! Cloud Tasks REST client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{check_status, HttpTask, TaskQueue, TokenSource};
use crate::error::UpstreamError;

const DEFAULT_BASE_URL: &str = "https://cloudtasks.googleapis.com/v2";
const SERVICE: &str = "Cloud Tasks";

pub struct CloudTasksClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl CloudTasksClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            tokens,
        })
    }
}

#[derive(Deserialize)]
struct TaskName {
    name: String,
}

#[derive(Deserialize)]
struct ListTasksResponse {
    #[serde(default)]
    tasks: Vec<TaskName>,
}

#[derive(Serialize)]
struct CreateTaskBody<'a> {
    task: WireTask<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTask<'a> {
    http_request: WireHttpRequest<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireHttpRequest<'a> {
    http_method: &'static str,
    url: &'a str,
    headers: BTreeMap<&'a str, &'a str>,
    /// base64 encoded
    body: String,
}

fn create_body(task: &HttpTask) -> CreateTaskBody<'_> {
    CreateTaskBody {
        task: WireTask {
            http_request: WireHttpRequest {
                http_method: "POST",
                url: &task.url,
                headers: task
                    .headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect(),
                body: BASE64.encode(&task.body),
            },
        },
    }
}

#[async_trait]
impl TaskQueue for CloudTasksClient {
    #[instrument(level = "debug", skip(self))]
    async fn list_tasks(&self, parent: &str, page_size: u32) -> Result<Vec<String>, UpstreamError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(format!("{}/{parent}/tasks", self.base_url))
            .bearer_auth(token)
            .query(&[("pageSize", page_size.to_string())])
            .send()
            .await?;
        let listed: ListTasksResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::decode(format!("listTasks response: {e}")))?;
        Ok(listed.tasks.into_iter().map(|t| t.name).collect())
    }

    #[instrument(level = "debug", skip(self, task), fields(url = %task.url))]
    async fn create_task(&self, parent: &str, task: &HttpTask) -> Result<String, UpstreamError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(format!("{}/{parent}/tasks", self.base_url))
            .bearer_auth(token)
            .json(&create_body(task))
            .send()
            .await?;
        let created: TaskName = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::decode(format!("createTask response: {e}")))?;
        Ok(created.name)
    }
}
