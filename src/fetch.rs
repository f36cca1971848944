//! Page download and readable-text extraction.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::extract::ContentExtractor;

/// Errors raised by [`PageFetcher::try_fetch`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Page request timed out")]
    Timeout,

    #[error("Page returned status {status}")]
    Http { status: u16 },

    #[error("Page extraction failed: {0}")]
    Extraction(#[source] tokio::task::JoinError),
}

impl FetchError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(error)
        }
    }
}

/// Turns a URL into plain text for the model's context.
///
/// Implementations never fail: an unreachable or unusable page yields an empty string.
#[async_trait]
pub trait FetchPage: Send + Sync {
    async fn fetch_text(&self, url: &str) -> String;
}

/// Downloads pages over HTTP and runs them through a [`ContentExtractor`].
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    extractor: ContentExtractor,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::with_client(config.web_client()?, config))
    }

    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            extractor: ContentExtractor::from_config(config),
            timeout: config.fetch_timeout,
        }
    }

    /// Fetches `url` and extracts its readable text, reporting why it could not.
    ///
    /// Any non-2xx status is an error, even when the body carries text.
    /// Extraction runs on the blocking pool and shares the page's time budget.
    pub async fn try_fetch(&self, url: &str) -> Result<String, FetchError> {
        let deadline = Instant::now() + self.timeout;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let html = response.text().await.map_err(FetchError::from_reqwest)?;
        let extractor = self.extractor;
        let extraction = tokio::task::spawn_blocking(move || extractor.extract(&html));
        match tokio::time::timeout_at(deadline, extraction).await {
            Ok(joined) => joined.map_err(FetchError::Extraction),
            Err(_) => Err(FetchError::Timeout),
        }
    }
}

#[async_trait]
impl FetchPage for PageFetcher {
    async fn fetch_text(&self, url: &str) -> String {
        match self.try_fetch(url).await {
            Ok(text) => text,
            Err(e) => {
                log::debug!("skipping {url}: {e}");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_messages() {
        assert_eq!(FetchError::Timeout.to_string(), "Page request timed out");
        assert_eq!(
            FetchError::Http { status: 404 }.to_string(),
            "Page returned status 404"
        );
    }

    #[tokio::test]
    async fn unreachable_page_yields_empty_text() {
        let config = Config {
            fetch_timeout: Duration::from_secs(2),
            ..Config::default()
        };
        let fetcher = PageFetcher::new(&config).unwrap();

        // Port 9 (discard) on loopback is closed in test environments.
        let text = fetcher.fetch_text("http://127.0.0.1:9/").await;
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn malformed_url_yields_empty_text() {
        let fetcher = PageFetcher::new(&Config::default()).unwrap();
        assert_eq!(fetcher.fetch_text("not a url").await, "");
    }
}
