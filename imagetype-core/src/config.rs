//! Pipeline configuration loaded from environment variables.
//!
//! Required values fail fast: a missing variable is reported by name before any
//! client is created.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::error::UpstreamError;
use crate::prompt::DEFAULT_TEMPLATE;
use crate::schema::SchemaError;
use crate::services::{MetadataServerToken, StaticToken, TokenSource};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} env variable is not set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Failed to read prompt file {path}: {source}")]
    PromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create client: {0}")]
    Client(#[from] UpstreamError),

    #[error("Invalid label schema: {0}")]
    Schema(#[from] SchemaError),
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Settings for the distribution run.
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub location: String,
    pub queue_id: String,
    /// Processing endpoint every task is addressed to.
    pub target_url: Url,
}

impl DistributorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_id = required(&lookup, "PROJECT_ID")?;
        let dataset_id = required(&lookup, "DATASET_ID")?;
        let location = required(&lookup, "LOCATION")?;
        let queue_id = required(&lookup, "QUEUE_ID")?;
        let raw_url = required(&lookup, "CLOUD_FUNCTION_URL")?;
        let target_url = Url::parse(&raw_url).map_err(|e| ConfigError::Invalid {
            key: "CLOUD_FUNCTION_URL",
            reason: e.to_string(),
        })?;
        if !matches!(target_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "CLOUD_FUNCTION_URL",
                reason: format!("unsupported scheme {}", target_url.scheme()),
            });
        }

        Ok(Self {
            project_id,
            dataset_id,
            location,
            queue_id,
            target_url,
        })
    }
}

/// Settings for per-product classification.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub table_name: String,
    pub model_name: String,
    pub gemini_api_key: String,
    pub prompt_template: String,
}

impl ClassifierConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_id = required(&lookup, "PROJECT_ID")?;
        let dataset_id = required(&lookup, "DATASET_ID")?;
        let table_name = required(&lookup, "TABLE_NAME")?;
        let model_name = required(&lookup, "MODEL_NAME")?;
        let gemini_api_key = required(&lookup, "GEMINI_API_KEY")?;

        let prompt_template = match optional(&lookup, "PROMPT_FILE") {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::PromptFile { path, source })?
            }
            None => DEFAULT_TEMPLATE.to_string(),
        };

        Ok(Self {
            project_id,
            dataset_id,
            table_name,
            model_name,
            gemini_api_key,
            prompt_template,
        })
    }

    /// `project.dataset.table` of the results table.
    pub fn table_id(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_name)
    }
}

/// Google Cloud credentials for BigQuery and Cloud Tasks.
///
/// `GOOGLE_OAUTH_ACCESS_TOKEN` wins when set; otherwise tokens come from the
/// metadata server of the hosting environment.
pub fn token_source_from_env() -> Result<Arc<dyn TokenSource>, ConfigError> {
    token_source_from_lookup(env_lookup)
}

pub fn token_source_from_lookup<F>(lookup: F) -> Result<Arc<dyn TokenSource>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    token_source(optional(&lookup, "GOOGLE_OAUTH_ACCESS_TOKEN"))
}

pub fn token_source(access_token: Option<String>) -> Result<Arc<dyn TokenSource>, ConfigError> {
    let source: Arc<dyn TokenSource> = match access_token {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(MetadataServerToken::new()?),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const DISTRIBUTOR_ENV: &[(&str, &str)] = &[
        ("PROJECT_ID", "proj"),
        ("DATASET_ID", "catalog"),
        ("LOCATION", "europe-west1"),
        ("QUEUE_ID", "products"),
        ("CLOUD_FUNCTION_URL", "https://classify.example.run.app/classify"),
    ];

    const CLASSIFIER_ENV: &[(&str, &str)] = &[
        ("PROJECT_ID", "proj"),
        ("DATASET_ID", "catalog"),
        ("TABLE_NAME", "image_labels"),
        ("MODEL_NAME", "gemini-2.0-flash"),
        ("GEMINI_API_KEY", "key"),
    ];

    #[test]
    fn test_distributor_config_loads() {
        let config = DistributorConfig::from_lookup(lookup(DISTRIBUTOR_ENV)).unwrap();
        assert_eq!(config.queue_id, "products");
        assert_eq!(config.target_url.host_str(), Some("classify.example.run.app"));
    }

    #[test]
    fn test_missing_variable_named() {
        let env: Vec<_> = DISTRIBUTOR_ENV
            .iter()
            .copied()
            .filter(|(k, _)| *k != "QUEUE_ID")
            .collect();
        let err = DistributorConfig::from_lookup(lookup(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("QUEUE_ID")));
        assert_eq!(err.to_string(), "QUEUE_ID env variable is not set");
    }

    #[test]
    fn test_blank_variable_counts_as_missing() {
        let mut env = DISTRIBUTOR_ENV.to_vec();
        env[0] = ("PROJECT_ID", "  ");
        assert!(matches!(
            DistributorConfig::from_lookup(lookup(&env)),
            Err(ConfigError::Missing("PROJECT_ID"))
        ));
    }

    #[test]
    fn test_invalid_endpoint_url() {
        let mut env = DISTRIBUTOR_ENV.to_vec();
        env[4] = ("CLOUD_FUNCTION_URL", "not a url");
        assert!(matches!(
            DistributorConfig::from_lookup(lookup(&env)),
            Err(ConfigError::Invalid { key: "CLOUD_FUNCTION_URL", .. })
        ));
    }

    #[test]
    fn test_classifier_config_defaults_prompt() {
        let config = ClassifierConfig::from_lookup(lookup(CLASSIFIER_ENV)).unwrap();
        assert_eq!(config.table_id(), "proj.catalog.image_labels");
        assert_eq!(config.prompt_template, DEFAULT_TEMPLATE);
    }

    #[test]
    fn test_missing_prompt_file_fails() {
        let mut env = CLASSIFIER_ENV.to_vec();
        env.push(("PROMPT_FILE", "/nonexistent/prompt.txt"));
        assert!(matches!(
            ClassifierConfig::from_lookup(lookup(&env)),
            Err(ConfigError::PromptFile { .. })
        ));
    }

    #[test]
    fn test_static_token_preferred() {
        assert!(token_source(Some("token".into())).is_ok());
    }
}
