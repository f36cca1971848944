//! Web search against an HTML results page (DuckDuckGo's `/html/` endpoint).

use std::time::Duration;

use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use crate::config::{Config, ConfigError};
use crate::models::SearchResult;

const RESULT_SELECTOR: &str = "div.result";
const RESULT_LINK_SELECTOR: &str = "a.result__a";

/// Query parameter carrying the real destination in redirect-wrapped links.
const REDIRECT_PARAM: &str = "uddg";

/// Base used to resolve scheme-relative redirect links such as `//duckduckgo.com/l/?uddg=…`.
const REDIRECT_BASE: &str = "https://duckduckgo.com/";

/// Errors raised by [`WebSearchClient::search`].
///
/// None of these abort a query: the caller reports them once and carries on
/// with an empty result list.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Search request timed out")]
    Timeout,

    #[error("Search provider returned status {status}")]
    Http { status: u16 },

    #[error("Invalid result selector: {0}")]
    Selector(String),

    #[error("Invalid search URL: {0}")]
    InvalidUrl(String),
}

impl SearchError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            SearchError::Timeout
        } else {
            SearchError::Network(error)
        }
    }
}

/// Queries the search provider and parses its ranked result list.
#[derive(Debug, Clone)]
pub struct WebSearchClient {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
    timeout: Duration,
}

impl WebSearchClient {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::with_client(config.web_client()?, config))
    }

    /// Uses an existing client; it must already send the identifying User-Agent.
    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: config.search_url.clone(),
            max_results: config.max_results,
            timeout: config.search_timeout,
        }
    }

    /// Returns up to `max_results` results in document order.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        log::debug!("searching for {query:?}");

        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| SearchError::InvalidUrl(format!("{}: {e}", self.endpoint)))?;
        let response = self
            .client
            .get(endpoint)
            .query(&[("q", query)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(SearchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Http {
                status: status.as_u16(),
            });
        }

        let html = response.text().await.map_err(SearchError::from_reqwest)?;
        parse_results(&html, self.max_results)
    }
}

/// Extracts result titles and destination URLs from a results page.
///
/// Result blocks without a result link are skipped.
pub fn parse_results(html: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
    let blocks = selector(RESULT_SELECTOR)?;
    let links = selector(RESULT_LINK_SELECTOR)?;
    let document = Html::parse_document(html);

    let results = document
        .select(&blocks)
        .filter_map(|block| {
            let link = block.select(&links).next()?;
            let href = link.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            let title = link.text().collect::<Vec<_>>().join(" ");
            let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
            Some(SearchResult::new(title, resolve_result_url(href)))
        })
        .take(max_results)
        .collect();

    Ok(results)
}

fn selector(css: &str) -> Result<Selector, SearchError> {
    Selector::parse(css).map_err(|e| SearchError::Selector(format!("{css}: {e}")))
}

/// Unwraps the provider's click-tracking redirect, returning `href` verbatim otherwise.
///
/// # Examples
///
/// ```
/// use reflexity::search::resolve_result_url;
///
/// let wrapped = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&rut=abc";
/// assert_eq!(resolve_result_url(wrapped), "https://www.rust-lang.org/");
/// assert_eq!(resolve_result_url("https://example.com/"), "https://example.com/");
/// ```
pub fn resolve_result_url(href: &str) -> String {
    if !href.contains(&format!("{REDIRECT_PARAM}=")) {
        return href.to_string();
    }

    let parsed = Url::parse(href).or_else(|_| Url::parse(REDIRECT_BASE).and_then(|base| base.join(href)));
    parsed
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == REDIRECT_PARAM)
                .map(|(_, value)| value.into_owned())
        })
        .filter(|target| !target.is_empty())
        .unwrap_or_else(|| href.to_string())
}
