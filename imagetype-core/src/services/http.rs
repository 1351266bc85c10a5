//! Image download over plain HTTP(S).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::{debug, instrument, warn};

use super::{check_status, FetchedImage, ImageFetcher};
use crate::error::UpstreamError;

/// Desktop browser user agent; some image hosts reject the default client UA.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-lived HTTP session used for every image download of an instance.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<FetchedImage, UpstreamError> {
        let start = Instant::now();

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(error = %e, "Image request failed");
            UpstreamError::Http(e)
        })?;
        let response = check_status("image host", response).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        debug!(
            bytes = bytes.len(),
            content_type = content_type.as_deref().unwrap_or("-"),
            latency_ms = start.elapsed().as_millis() as u64,
            "Downloaded image"
        );

        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_looks_like_a_browser() {
        assert!(USER_AGENT.starts_with("Mozilla/5.0"));
        assert!(USER_AGENT.contains("Chrome/"));
        assert!(!USER_AGENT.contains("  "));
    }

    #[test]
    fn test_create_fetcher() {
        assert!(HttpImageFetcher::new().is_ok());
    }
}
