//! Runtime configuration shared by every pipeline component.
//!
//! All endpoints, caps and timeouts live here instead of in module-level
//! constants, so tests can point the components at local fake servers.

use std::time::Duration;

use thiserror::Error;

/// Default model server address.
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Default search provider endpoint (HTML results page).
pub const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// Browser-like identifying header. The search provider rejects default client identifiers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

/// Maximum number of search results kept per query.
pub const MAX_RESULTS: usize = 5;

/// Maximum number of characters extracted from a single page.
pub const MAX_PAGE_CHARS: usize = 5000;

/// Resolution of the pull progress bar, in segments.
pub const PROGRESS_BAR_WIDTH: usize = 30;

/// Errors raised while building a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One of the configured URLs does not parse
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The underlying HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub ollama_host: String,
    pub search_url: String,
    pub user_agent: String,
    pub max_results: usize,
    pub max_page_chars: usize,
    pub progress_bar_width: usize,
    pub search_timeout: Duration,
    pub fetch_timeout: Duration,
    pub health_timeout: Duration,
    pub catalog_timeout: Duration,
    pub connect_timeout: Duration,
    /// Longest wait for the next line of a chat stream.
    pub chat_idle_timeout: Duration,
    /// Longest wait for the next line of a pull stream; `None` waits forever.
    pub pull_idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_results: MAX_RESULTS,
            max_page_chars: MAX_PAGE_CHARS,
            progress_bar_width: PROGRESS_BAR_WIDTH,
            search_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(20),
            health_timeout: Duration::from_secs(4),
            catalog_timeout: Duration::from_secs(8),
            connect_timeout: Duration::from_secs(5),
            chat_idle_timeout: Duration::from_secs(300),
            pull_idle_timeout: None,
        }
    }
}

impl Config {
    /// Builds a configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        ConfigBuilder::new().build()
    }

    /// Builds the HTTP client used for web requests (search and page fetches).
    ///
    /// Redirects are followed with reqwest's default policy.
    pub fn web_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(ConfigError::Client)
    }

    /// Base URL without a trailing slash.
    pub fn ollama_base(&self) -> &str {
        self.ollama_host.trim_end_matches('/')
    }
}

/// Builder for [`Config`].
///
/// Explicit builder values win over environment variables, which win over defaults.
///
/// # Environment Variables
///
/// - `OLLAMA_HOST`: model server base URL
/// - `REFLEXITY_SEARCH_URL`: search provider endpoint
/// - `REFLEXITY_USER_AGENT`: identifying header sent to the web
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use reflexity::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .ollama_host("http://localhost:11434/")
///     .max_results(3)
///     .fetch_timeout(Duration::from_secs(10))
///     .build()
///     .expect("Failed to build configuration");
/// assert_eq!(config.ollama_base(), "http://localhost:11434");
/// assert_eq!(config.max_results, 3);
/// assert_eq!(config.fetch_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    ollama_host: Option<String>,
    search_url: Option<String>,
    user_agent: Option<String>,
    max_results: Option<usize>,
    max_page_chars: Option<usize>,
    chat_idle_timeout: Option<Duration>,
    fetch_timeout: Option<Duration>,
}

impl ConfigBuilder {
    /// Creates a builder with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model server base URL.
    ///
    /// # Arguments
    ///
    /// * `url` - The base URL (e.g., "http://localhost:11434")
    pub fn ollama_host(mut self, url: impl Into<String>) -> Self {
        self.ollama_host = Some(url.into());
        self
    }

    /// Sets the search provider endpoint.
    ///
    /// # Arguments
    ///
    /// * `url` - The HTML search page (e.g., "https://html.duckduckgo.com/html/")
    pub fn search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = Some(url.into());
        self
    }

    /// Sets the User-Agent sent with search and page requests.
    ///
    /// # Arguments
    ///
    /// * `user_agent` - The full header value
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Caps how many search results are kept.
    ///
    /// # Arguments
    ///
    /// * `max` - The number of results (default 5)
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Caps the characters kept from each page.
    pub fn max_page_chars(mut self, max: usize) -> Self {
        self.max_page_chars = Some(max);
        self
    }

    /// Longest wait for the next chunk of a chat answer.
    pub fn chat_idle_timeout(mut self, timeout: Duration) -> Self {
        self.chat_idle_timeout = Some(timeout);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Builds the `Config` from the builder values, the environment and the defaults.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Config)` if both URLs parse,
    /// or `Err(ConfigError::InvalidUrl)` naming the first one that does not.
    pub fn build(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();

        let ollama_host = self
            .ollama_host
            .or_else(|| env_non_empty("OLLAMA_HOST"))
            .unwrap_or(defaults.ollama_host);
        let search_url = self
            .search_url
            .or_else(|| env_non_empty("REFLEXITY_SEARCH_URL"))
            .unwrap_or(defaults.search_url);
        let user_agent = self
            .user_agent
            .or_else(|| env_non_empty("REFLEXITY_USER_AGENT"))
            .unwrap_or(defaults.user_agent);

        for url in [&ollama_host, &search_url] {
            url::Url::parse(url).map_err(|e| ConfigError::InvalidUrl(format!("{url}: {e}")))?;
        }

        Ok(Config {
            ollama_host,
            search_url,
            user_agent,
            max_results: self.max_results.unwrap_or(defaults.max_results),
            max_page_chars: self.max_page_chars.unwrap_or(defaults.max_page_chars),
            chat_idle_timeout: self.chat_idle_timeout.unwrap_or(defaults.chat_idle_timeout),
            fetch_timeout: self.fetch_timeout.unwrap_or(defaults.fetch_timeout),
            ..defaults
        })
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
