//! Imagetype Core - product image classification pipeline
//!
//! Two flows share one data model:
//!
//! - the [`Distributor`] reads candidate products from a BigQuery view and
//!   enqueues one Cloud Tasks HTTP task per product;
//! - the [`Classifier`] handles one product: it downloads every image, uploads
//!   them to the Gemini file store, labels them all with a single multimodal
//!   request and writes one BigQuery row per image.
//!
//! External systems sit behind the traits in [`services`]; [`mock`] provides
//! in-memory fakes of each of them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use imagetype_core::mock::{MockImageFetcher, MockInference, MockWarehouse};
//! use imagetype_core::{Classifier, ImageType, Product};
//!
//! # async fn example() -> imagetype_core::Result<()> {
//! let classifier = Classifier::new(
//!     Arc::new(MockImageFetcher::new()),
//!     Arc::new(MockInference::labeling(ImageType::Silo)),
//!     Arc::new(MockWarehouse::new()),
//!     imagetype_core::prompt::DEFAULT_TEMPLATE,
//!     "project.dataset.image_labels",
//! )
//! .expect("label schema is valid");
//!
//! let product: Product = serde_json::from_str(
//!     r#"{"offer_id": "sku-1", "merchant_id": 1, "aggregator_id": 2}"#,
//! )
//! .expect("valid product");
//! let result = classifier.process(&product).await?;
//! assert!(result.images.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod distributor;
pub mod error;
pub mod label;
pub mod mock;
pub mod processed;
pub mod product;
pub mod prompt;
pub mod schema;
pub mod services;

pub use classifier::{warehouse_rows, Classification, Classifier, ProductStage};
pub use config::{
    token_source, token_source_from_env, token_source_from_lookup, ClassifierConfig, ConfigError,
    DistributorConfig,
};
pub use distributor::{
    candidate_query, CandidateView, Distributor, EnqueueFailure, EnqueueReport, RunOutcome,
    DEFAULT_PRODUCT_LIMIT,
};
pub use error::{
    ClassifyError, DistributeError, InferenceFailure, PersistFailure, Result, RowError,
    UpstreamError,
};
pub use label::{FieldKind, FieldSpec, ImageType, LabelSchema, LabeledImage};
pub use processed::{FileRef, ImageMetadata, ProcessedImage};
pub use product::{FilterError, Product, ProductFilter};
pub use schema::{table_schema_for, table_schema_json, SchemaError, TableField};
