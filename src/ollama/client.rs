/// Ollama HTTP client implementation.
///
/// This module provides `OllamaClient` for talking to a local model server: the
/// health check, the model catalog and the streaming POST used by chat and pull.
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;

use super::stream::json_lines;
use crate::config::Config;
use crate::models::ModelInfo;

/// A lazy, single-pass sequence of decoded JSON events from an open response.
pub type EventStream = BoxStream<'static, Result<serde_json::Value, OllamaError>>;

/// Errors that can occur when interacting with the Ollama API.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// Network-related errors (connection failures, DNS resolution, etc.)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// No response, or no further line of a streamed response, within the limit
    #[error("Request timed out")]
    Timeout,

    /// Non-2xx status, with the server's error message when it sent one
    #[error("HTTP error: status {status}{}", detail_suffix(.detail))]
    Http { status: u16, detail: Option<String> },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Error event embedded in the response stream
    #[error("Ollama API error: {message}")]
    Api { message: String },

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Pull requested without a model name
    #[error("No model name provided")]
    EmptyModelName,
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl OllamaError {
    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            OllamaError::Timeout
        } else {
            OllamaError::Network(error)
        }
    }

    /// The error a stream event reports through its `error` field, if any.
    ///
    /// Read from the raw value so an error line with otherwise malformed
    /// fields still ends the stream.
    pub(crate) fn from_event(value: &serde_json::Value) -> Option<Self> {
        value
            .get("error")
            .and_then(|error| error.as_str())
            .map(|message| OllamaError::Api {
                message: message.to_string(),
            })
    }
}

/// Builder for constructing `OllamaClient` instances.
///
/// # Examples
///
/// ```
/// use reflexity::ollama::OllamaClientBuilder;
///
/// let client = OllamaClientBuilder::new()
///     .base_url("http://localhost:11434")
///     .build()
///     .expect("Failed to create client");
/// assert_eq!(client.base_url(), "http://localhost:11434");
/// ```
#[derive(Debug, Default)]
pub struct OllamaClientBuilder {
    base_url: Option<String>,
    config: Option<Config>,
}

impl OllamaClientBuilder {
    /// Creates a new `OllamaClientBuilder` with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL for the Ollama API, overriding the configuration.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Uses timeouts and the base URL from `config`.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `OllamaClient` with the configured settings.
    ///
    /// Without an explicit configuration, `Config::from_env()` is used, so the
    /// `OLLAMA_HOST` environment variable applies.
    pub fn build(self) -> Result<OllamaClient, OllamaError> {
        let config = match self.config {
            Some(config) => config,
            None => Config::from_env().map_err(|e| OllamaError::InvalidUrl(e.to_string()))?,
        };

        let base_url = match self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => config.ollama_base().to_string(),
        };

        reqwest::Url::parse(&base_url)
            .map_err(|e| OllamaError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        // No client-wide timeout: streamed responses are bounded per line instead.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(OllamaError::Network)?;

        Ok(OllamaClient {
            client,
            base_url,
            health_timeout: config.health_timeout,
            catalog_timeout: config.catalog_timeout,
        })
    }
}

/// Async HTTP client for interacting with the Ollama API.
///
/// It should be constructed using `OllamaClientBuilder`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
    catalog_timeout: Duration,
}

/// Trait for Ollama API client operations.
///
/// This trait enables test doubles for the streaming consumers and provides
/// a clean interface for the model server.
#[async_trait]
pub trait OllamaClientTrait: Send + Sync {
    /// Opens a streaming POST to `path` and returns its decoded line events.
    ///
    /// Fails before yielding anything if the server answers with a non-2xx
    /// status. The connection stays open until the returned stream is
    /// exhausted or dropped.
    async fn stream_json(
        &self,
        path: &str,
        body: serde_json::Value,
        idle_timeout: Option<Duration>,
    ) -> Result<EventStream, OllamaError>;
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl OllamaClient {
    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Returns `true` if the server answers `GET /api/tags` with a 2xx status.
    pub async fn is_available(&self) -> bool {
        let result = self
            .client
            .get(self.endpoint("/api/tags"))
            .timeout(self.health_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::debug!("model server health check failed: {e}");
                false
            }
        }
    }

    /// Lists locally available models, in the order the server reports them.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, OllamaError> {
        let response = self
            .client
            .get(self.endpoint("/api/tags"))
            .timeout(self.catalog_timeout)
            .send()
            .await
            .map_err(OllamaError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(OllamaError::Http {
                status: response.status().as_u16(),
                detail: None,
            });
        }

        let body = response.text().await.map_err(OllamaError::from_reqwest)?;
        let tags: TagsResponse = serde_json::from_str(&body).map_err(OllamaError::Serialization)?;
        Ok(tags.models)
    }
}

#[async_trait]
impl OllamaClientTrait for OllamaClient {
    async fn stream_json(
        &self,
        path: &str,
        body: serde_json::Value,
        idle_timeout: Option<Duration>,
    ) -> Result<EventStream, OllamaError> {
        let url = self.endpoint(path);
        log::debug!("POST {url} (streaming)");

        let request = self.client.post(&url).json(&body).send();
        let response = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| OllamaError::Timeout)?,
            None => request.await,
        }
        .map_err(OllamaError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.ok().and_then(|text| error_message(&text));
            return Err(OllamaError::Http {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(json_lines(response.bytes_stream(), idle_timeout))
    }
}

/// Pulls the `error` field out of an error response body.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error)
        .filter(|m| !m.is_empty())
}
