//! Per-product image classification.
//!
//! For one product: download every image, upload each to the inference
//! provider's file store, classify all of them in one multimodal request,
//! release the uploaded files, and write one warehouse row per image.
//!
//! ```text
//! Pending -> ImagesFetched -> Classified -> Persisted
//!    \_____________\_______________\____________> Failed (logged, returned)
//! ```
//!
//! Everything runs sequentially; no two external calls overlap.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ClassifierConfig, ConfigError};
use crate::error::{ClassifyError, InferenceFailure, PersistFailure, Result};
use crate::label::LabeledImage;
use crate::processed::{FileRef, ImageMetadata, ProcessedImage};
use crate::product::Product;
use crate::prompt::build_prompt;
use crate::schema::response_schema_for;
use crate::services::{
    BigQueryClient, GeminiClient, GeminiConfig, GenerateRequest, GenerationConfig,
    HttpImageFetcher, ImageFetcher, InferenceProvider, TokenSource, Warehouse,
};

/// Insertion timestamp format shared by every row of one write.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where a product is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductStage {
    Pending,
    ImagesFetched,
    Classified,
    Persisted,
    Failed,
}

impl std::fmt::Display for ProductStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::ImagesFetched => "images_fetched",
            Self::Classified => "classified",
            Self::Persisted => "persisted",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a successfully processed product.
#[derive(Debug, Clone)]
pub struct Classification {
    pub images: Vec<ProcessedImage>,
    /// Raw model response; empty when the product had no images.
    pub model_response: String,
}

/// Classifies products using long-lived service handles.
///
/// One instance is built per process and reused for every product it handles.
pub struct Classifier {
    fetcher: Arc<dyn ImageFetcher>,
    inference: Arc<dyn InferenceProvider>,
    warehouse: Arc<dyn Warehouse>,
    prompt_template: String,
    table_id: String,
    response_schema: Value,
}

impl Classifier {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        inference: Arc<dyn InferenceProvider>,
        warehouse: Arc<dyn Warehouse>,
        prompt_template: impl Into<String>,
        table_id: impl Into<String>,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            fetcher,
            inference,
            warehouse,
            prompt_template: prompt_template.into(),
            table_id: table_id.into(),
            response_schema: response_schema_for::<LabeledImage>()?,
        })
    }

    /// Build a classifier talking to the real image hosts, Gemini and BigQuery.
    pub fn from_config(
        config: &ClassifierConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> std::result::Result<Self, ConfigError> {
        let gemini = GeminiClient::new(GeminiConfig::new(
            config.gemini_api_key.clone(),
            config.model_name.clone(),
        ))?;
        let bigquery = BigQueryClient::new(config.project_id.clone(), tokens)?;

        Self::new(
            Arc::new(HttpImageFetcher::new()?),
            Arc::new(gemini),
            Arc::new(bigquery),
            config.prompt_template.clone(),
            config.table_id(),
        )
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    /// Download one image, extract its metadata and upload it for inference.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_and_upload_image(&self, url: &str) -> Result<ProcessedImage> {
        let fetched = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|source| ClassifyError::ImageFetch {
                url: url.to_string(),
                source,
            })?;

        let metadata = ImageMetadata::inspect(&fetched.bytes, fetched.content_type.as_deref())
            .map_err(|source| ClassifyError::ImageFetch {
                url: url.to_string(),
                source,
            })?;

        let file_ref = self
            .inference
            .upload_file(fetched.bytes, &metadata.mime_type)
            .await
            .map_err(|source| ClassifyError::Upload {
                url: url.to_string(),
                source,
            })?;

        debug!(
            file = %file_ref.name,
            width = metadata.width,
            height = metadata.height,
            "Image uploaded"
        );
        Ok(ProcessedImage::new(url, metadata, file_ref))
    }

    /// Label every image with one multimodal request.
    ///
    /// The uploaded files are released afterwards whether or not the request
    /// succeeded. Returns the raw model response.
    pub async fn classify_batch(
        &self,
        product: &Product,
        images: &mut [ProcessedImage],
    ) -> Result<String> {
        let outcome = self.label_images(product, images).await;
        self.release_files(images).await;
        outcome.map_err(ClassifyError::from)
    }

    async fn label_images(
        &self,
        product: &Product,
        images: &mut [ProcessedImage],
    ) -> std::result::Result<String, InferenceFailure> {
        let prompt = build_prompt(&self.prompt_template, product, images.len());

        let files = match images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                image
                    .file_ref
                    .clone()
                    .ok_or(InferenceFailure::MissingFile { index })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
        {
            Ok(files) => files,
            Err(failure) => return Err(report_failure(product, &prompt, None, failure)),
        };

        let request = GenerateRequest {
            files,
            prompt,
            config: GenerationConfig::structured(self.response_schema.clone()),
        };

        let text = match self.inference.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                let failure = InferenceFailure::Request(e);
                return Err(report_failure(product, &request.prompt, None, failure));
            }
        };

        match assign_labels(&text, images) {
            Ok(()) => Ok(text),
            Err(failure) => Err(report_failure(product, &request.prompt, Some(&text), failure)),
        }
    }

    /// Release every uploaded file still held by `images`.
    ///
    /// Each reference is taken out of its image, so a file is released at most
    /// once. Release failures are logged and do not stop the remaining releases.
    pub async fn release_files(&self, images: &mut [ProcessedImage]) {
        for image in images.iter_mut() {
            let Some(file) = image.file_ref.take() else {
                continue;
            };
            if let Err(e) = self.inference.delete_file(&file).await {
                warn!(file = %file.name, image_link = %image.image_link, error = %e, "Failed to release uploaded file");
            }
        }
    }

    /// Write one row per image, all stamped with the same insertion time.
    pub async fn persist(&self, images: &[ProcessedImage]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }

        let timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let rows = warehouse_rows(images, &timestamp)?;

        let row_errors = self
            .warehouse
            .insert_rows(&self.table_id, rows)
            .await
            .map_err(PersistFailure::Request)?;
        if !row_errors.is_empty() {
            return Err(PersistFailure::RowErrors(row_errors).into());
        }

        debug!(rows = images.len(), table = %self.table_id, "Rows inserted");
        Ok(())
    }

    /// Run the full pipeline for one product.
    ///
    /// Failures are logged with the product payload and returned so the caller
    /// can report them (the task handler turns them into a 5xx for redelivery).
    #[instrument(level = "info", skip_all, fields(offer_id = %product.offer_id))]
    pub async fn process(&self, product: &Product) -> Result<Classification> {
        let mut stage = ProductStage::Pending;

        let outcome = self.run_stages(product, &mut stage).await;
        match outcome {
            Ok(classification) => {
                info!(
                    product = %product.to_json(),
                    processed_images = %serde_json::to_string(&classification.images).unwrap_or_default(),
                    model_response = %classification.model_response,
                    "[COMPLETED] Finished processing product ID {}",
                    product.offer_id
                );
                Ok(classification)
            }
            Err(e) => {
                let failed_after = std::mem::replace(&mut stage, ProductStage::Failed);
                error!(
                    product = %product.to_json(),
                    stage = %stage,
                    failed_after = %failed_after,
                    error = %e,
                    "[FAILED] Error processing product ID {}",
                    product.offer_id
                );
                Err(e)
            }
        }
    }

    async fn run_stages(&self, product: &Product, stage: &mut ProductStage) -> Result<Classification> {
        let mut uploads = self.fetch_all(&product.image_links()).await?;
        *stage = ProductStage::ImagesFetched;

        let model_response = if uploads.images.is_empty() {
            String::new()
        } else {
            self.classify_batch(product, &mut uploads.images).await?
        };
        *stage = ProductStage::Classified;

        let images = uploads.into_images();
        self.persist(&images).await?;
        *stage = ProductStage::Persisted;

        Ok(Classification {
            images,
            model_response,
        })
    }

    /// Fetch and upload sequentially. On failure the files uploaded so far are
    /// released before the error is returned.
    async fn fetch_all(&self, links: &[&str]) -> Result<PendingUploads> {
        let mut uploads = PendingUploads::new(self.inference.clone(), links.len());
        for link in links {
            match self.fetch_and_upload_image(link).await {
                Ok(image) => uploads.images.push(image),
                Err(e) => {
                    self.release_files(&mut uploads.images).await;
                    return Err(e);
                }
            }
        }
        Ok(uploads)
    }
}

/// Images of one product whose uploaded files may still be held.
///
/// If the pipeline future is dropped mid-flight (request timeout, client
/// hang-up), the files still referenced are released on a background task.
struct PendingUploads {
    inference: Arc<dyn InferenceProvider>,
    images: Vec<ProcessedImage>,
}

impl PendingUploads {
    fn new(inference: Arc<dyn InferenceProvider>, capacity: usize) -> Self {
        Self {
            inference,
            images: Vec::with_capacity(capacity),
        }
    }

    fn into_images(mut self) -> Vec<ProcessedImage> {
        std::mem::take(&mut self.images)
    }
}

impl Drop for PendingUploads {
    fn drop(&mut self) {
        let files: Vec<FileRef> = self
            .images
            .iter_mut()
            .filter_map(|image| image.file_ref.take())
            .collect();
        if files.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(files = files.len(), "No runtime left to release uploaded files");
            return;
        };
        warn!(files = files.len(), "Processing cancelled, releasing uploaded files");
        let inference = self.inference.clone();
        runtime.spawn(async move {
            for file in files {
                if let Err(e) = inference.delete_file(&file).await {
                    warn!(file = %file.name, error = %e, "Failed to release uploaded file");
                }
            }
        });
    }
}

fn report_failure(
    product: &Product,
    prompt: &str,
    raw_response: Option<&str>,
    failure: InferenceFailure,
) -> InferenceFailure {
    warn!(
        offer_id = %product.offer_id,
        error = %failure,
        prompt = %prompt,
        raw_response = raw_response.unwrap_or(""),
        "Multimodal classification failed"
    );
    failure
}

/// Parse the model response and label `images` by position.
fn assign_labels(
    text: &str,
    images: &mut [ProcessedImage],
) -> std::result::Result<(), InferenceFailure> {
    let labels: Vec<LabeledImage> = serde_json::from_str(text).map_err(InferenceFailure::Parse)?;
    if labels.len() != images.len() {
        return Err(InferenceFailure::CountMismatch {
            submitted: images.len(),
            returned: labels.len(),
        });
    }
    for (image, label) in images.iter_mut().zip(labels) {
        image.labeled_image = Some(label);
    }
    Ok(())
}

#[derive(Serialize)]
struct WarehouseRow<'a> {
    image_link: &'a str,
    mime_type: &'a str,
    width: u32,
    height: u32,
    sha256_hash: &'a str,
    #[serde(flatten)]
    label: &'a LabeledImage,
    timestamp: &'a str,
}

/// Warehouse rows for `images`: image fields (never the file reference), the
/// flattened label fields and the shared `timestamp`.
pub fn warehouse_rows(
    images: &[ProcessedImage],
    timestamp: &str,
) -> std::result::Result<Vec<Value>, PersistFailure> {
    images
        .iter()
        .map(|image| {
            let label = image
                .labeled_image
                .as_ref()
                .ok_or_else(|| PersistFailure::Unlabeled {
                    image_link: image.image_link.clone(),
                })?;
            serde_json::to_value(WarehouseRow {
                image_link: &image.image_link,
                mime_type: &image.mime_type,
                width: image.width,
                height: image.height,
                sha256_hash: &image.sha256_hash,
                label,
                timestamp,
            })
            .map_err(PersistFailure::Serialize)
        })
        .collect()
}
