//! HTTP image fetching

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::FetchSettings;
use super::SourceError;

/// Fetches encoded image bytes by URL
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, SourceError>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the configured timeout and user agent
    pub fn new(settings: &FetchSettings) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(settings.user_agent.as_str())
            .build()?;

        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, SourceError> {
        debug!(url = %url, "Fetching image");

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            warn!(url = %url, status = response.status().as_u16(), "Image fetch rejected");
            return Err(SourceError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SourceError::FetchFailed(format!("empty body from {}", url)));
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        assert!(HttpFetcher::new(&FetchSettings::default()).is_ok());
    }
}
