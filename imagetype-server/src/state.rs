//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use imagetype_core::{
    token_source_from_lookup, Classifier, ClassifierConfig, ConfigError, Distributor,
    DistributorConfig,
};

use crate::config::ServerRole;

/// Application state containing shared resources.
///
/// Each flow is optional so one binary can be deployed as the task handler,
/// the distributor trigger, or both. A flow left out of the role answers 503.
#[derive(Clone, Default)]
pub struct AppState {
    /// Per-product classification pipeline behind `POST /classify`
    pub classifier: Option<Arc<Classifier>>,
    /// Distribution run behind `POST /push`
    pub distributor: Option<Arc<Distributor>>,
}

impl AppState {
    pub fn new(classifier: Option<Classifier>, distributor: Option<Distributor>) -> Self {
        Self {
            classifier: classifier.map(Arc::new),
            distributor: distributor.map(Arc::new),
        }
    }

    /// Build the flows selected by `role` from environment variables.
    pub fn from_env(role: ServerRole) -> Result<Self, ConfigError> {
        Self::from_lookup(role, |key| std::env::var(key).ok())
    }

    /// Build the flows selected by `role`. Any missing or invalid variable of
    /// a selected flow is an error.
    pub fn from_lookup<F>(role: ServerRole, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let classifier_config = role
            .serves_classifier()
            .then(|| ClassifierConfig::from_lookup(&lookup))
            .transpose()?;
        let distributor_config = role
            .serves_distributor()
            .then(|| DistributorConfig::from_lookup(&lookup))
            .transpose()?;

        let tokens = token_source_from_lookup(&lookup)?;
        let classifier = classifier_config
            .map(|config| Classifier::from_config(&config, tokens.clone()))
            .transpose()?;
        let distributor = distributor_config
            .map(|config| Distributor::from_config(config, tokens))
            .transpose()?;

        Ok(Self::new(classifier, distributor))
    }
}
