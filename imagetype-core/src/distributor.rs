//! Fan-out of candidate products onto the classification work queue.
//!
//! A run reads a bounded batch of products from a warehouse view, refuses to
//! publish while the queue still holds tasks from an earlier run, and then
//! creates one HTTP task per product. Publishing failures are counted per
//! product and never abort the batch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{ConfigError, DistributorConfig};
use crate::error::{DistributeError, UpstreamError};
use crate::product::{Product, ProductFilter};
use crate::services::{
    BigQueryClient, CloudTasksClient, HttpTask, ParamValue, Row, SqlQuery, TaskQueue,
    TokenSource, Warehouse,
};

pub const DEFAULT_PRODUCT_LIMIT: u32 = 10;

const PRODUCT_COLUMNS: &str =
    "offer_id, merchant_id, aggregator_id, title, product_type, brand, image_link, additional_image_links";

/// Which warehouse view supplies candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateView {
    /// Every eligible product.
    All,
    /// Only products without classified images yet.
    #[default]
    New,
}

impl CandidateView {
    pub fn view_name(&self) -> &'static str {
        match self {
            Self::All => "get_products_view",
            Self::New => "get_new_products_view",
        }
    }
}

impl std::str::FromStr for CandidateView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "new" => Ok(Self::New),
            other => Err(format!("unknown view '{other}', expected 'all' or 'new'")),
        }
    }
}

/// Candidate query for `view`. Filter values are bound as named parameters.
pub fn candidate_query(
    project: &str,
    dataset: &str,
    view: CandidateView,
    limit: u32,
    filter: Option<&ProductFilter>,
) -> SqlQuery {
    let mut query = SqlQuery::default();
    let mut conditions = Vec::new();

    if let Some(filter) = filter {
        if let Some(product_type) = filter.product_type() {
            conditions.push("product_type = @product_type");
            query.bind("product_type", ParamValue::String(product_type.to_string()));
        }
        if !filter.brands().is_empty() {
            conditions.push("brand IN UNNEST(@brands)");
            query.bind("brands", ParamValue::StringArray(filter.brands().to_vec()));
        }
        if !filter.offer_ids().is_empty() {
            conditions.push("offer_id IN UNNEST(@offer_ids)");
            query.bind("offer_ids", ParamValue::StringArray(filter.offer_ids().to_vec()));
        }
    }

    let mut sql = format!(
        "SELECT {PRODUCT_COLUMNS} FROM `{project}.{dataset}.{}`",
        view.view_name()
    );
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" LIMIT @limit");
    query.bind("limit", ParamValue::Int64(i64::from(limit)));

    query.sql = sql;
    query
}

/// A product whose task could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueFailure {
    pub offer_id: String,
    pub error: String,
}

/// Tally of one `enqueue` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnqueueReport {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<EnqueueFailure>,
}

impl EnqueueReport {
    fn record(mut self, offer_id: &str, outcome: Result<String, UpstreamError>) -> Self {
        match outcome {
            Ok(task) => {
                debug!(offer_id, task = %task, "Task created");
                self.succeeded += 1;
            }
            Err(e) => {
                warn!(offer_id, error = %e, "Failed to enqueue product");
                self.failed += 1;
                self.failures.push(EnqueueFailure {
                    offer_id: offer_id.to_string(),
                    error: e.to_string(),
                });
            }
        }
        self
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The view returned no candidates; the queue was not touched.
    NothingToDo,
    Enqueued(EnqueueReport),
}

pub struct Distributor {
    warehouse: Arc<dyn Warehouse>,
    queue: Arc<dyn TaskQueue>,
    config: DistributorConfig,
}

impl Distributor {
    pub fn new(warehouse: Arc<dyn Warehouse>, queue: Arc<dyn TaskQueue>, config: DistributorConfig) -> Self {
        Self {
            warehouse,
            queue,
            config,
        }
    }

    /// Build a distributor backed by BigQuery and Cloud Tasks.
    pub fn from_config(config: DistributorConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, ConfigError> {
        let warehouse = BigQueryClient::new(config.project_id.clone(), tokens.clone())?;
        let queue = CloudTasksClient::new(tokens)?;
        Ok(Self::new(Arc::new(warehouse), Arc::new(queue), config))
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    /// Read up to `limit` products from `view`, narrowed by `filter`.
    #[instrument(level = "debug", skip(self, filter))]
    pub async fn fetch_candidates(
        &self,
        limit: u32,
        filter: Option<&ProductFilter>,
        view: CandidateView,
    ) -> Result<Vec<Product>, DistributeError> {
        let query = candidate_query(&self.config.project_id, &self.config.dataset_id, view, limit, filter);
        let rows = self
            .warehouse
            .query(&query)
            .await
            .map_err(DistributeError::SourceRead)?;

        rows.into_iter()
            .map(decode_product)
            .collect::<Result<Vec<_>, _>>()
            .map_err(DistributeError::SourceRead)
    }

    fn queue_path(&self) -> Result<String, DistributeError> {
        self.queue
            .queue_path(&self.config.project_id, &self.config.location, &self.config.queue_id)
            .map_err(DistributeError::QueuePublish)
    }

    /// True when the work queue holds no pending tasks.
    pub async fn is_downstream_queue_empty(&self) -> Result<bool, DistributeError> {
        let parent = self.queue_path()?;
        let tasks = self
            .queue
            .list_tasks(&parent, 1)
            .await
            .map_err(DistributeError::QueuePublish)?;
        Ok(tasks.is_empty())
    }

    /// Publish one task per product, addressed to `target_url`.
    ///
    /// Only an unresolvable queue fails the call; per-product failures are
    /// logged and counted in the report.
    pub async fn enqueue(&self, products: &[Product], target_url: &Url) -> Result<EnqueueReport, DistributeError> {
        let parent = self.queue_path()?;

        let mut report = EnqueueReport::default();
        for product in products {
            let outcome = match serde_json::to_vec(product) {
                Ok(body) => {
                    let task = HttpTask::json(target_url.as_str(), body);
                    self.queue.create_task(&parent, &task).await
                }
                Err(e) => Err(UpstreamError::decode(format!("product payload: {e}"))),
            };
            report = report.record(&product.offer_id, outcome);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Enqueued {} of {} products",
            report.succeeded,
            report.total()
        );
        Ok(report)
    }

    /// One scheduled distribution run against the configured endpoint.
    #[instrument(level = "info", skip(self, filter))]
    pub async fn run(
        &self,
        limit: u32,
        filter: Option<&ProductFilter>,
        view: CandidateView,
    ) -> Result<RunOutcome, DistributeError> {
        let products = self.fetch_candidates(limit, filter, view).await?;
        if products.is_empty() {
            info!(view = view.view_name(), "No products found, nothing to enqueue");
            return Ok(RunOutcome::NothingToDo);
        }

        if !self.is_downstream_queue_empty().await? {
            warn!(queue = %self.config.queue_id, "Work queue is not empty");
            return Err(DistributeError::QueueNotEmpty);
        }

        let report = self.enqueue(&products, &self.config.target_url).await?;
        Ok(RunOutcome::Enqueued(report))
    }
}

fn decode_product(row: Row) -> Result<Product, UpstreamError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| UpstreamError::decode(format!("product row: {e}")))
}
