//! OAuth access tokens for the Google Cloud REST APIs.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::check_status;
use crate::error::UpstreamError;

/// Token endpoint of the GCE/Cloud Run metadata server.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, UpstreamError>;
}

/// A fixed token, e.g. from `gcloud auth print-access-token`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, UpstreamError> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Tokens of the instance's default service account, cached until shortly
/// before expiry.
pub struct MetadataServerToken {
    client: Client,
    url: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl MetadataServerToken {
    pub fn new() -> Result<Self, UpstreamError> {
        Self::with_url(METADATA_TOKEN_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            cached: Mutex::new(None),
        })
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.cached.lock().ok()?;
        guard
            .as_ref()
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(token, _)| token.clone())
    }
}

#[async_trait]
impl TokenSource for MetadataServerToken {
    async fn access_token(&self) -> Result<String, UpstreamError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| UpstreamError::Auth(format!("metadata server unreachable: {e}")))?;
        let token: MetadataToken = check_status("metadata server", response)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::Auth(format!("invalid token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(expires_in = token.expires_in, "Fetched access token");

        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some((token.access_token.clone(), Instant::now() + lifetime));
        }
        Ok(token.access_token)
    }
}
