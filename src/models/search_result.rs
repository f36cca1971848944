/// A single hit from the search provider, in provider relevance order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    title: String,
    url: String,
}

impl SearchResult {
    /// Creates a new search result.
    ///
    /// # Examples
    ///
    /// ```
    /// use reflexity::SearchResult;
    ///
    /// let result = SearchResult::new("Rust", "https://www.rust-lang.org/");
    /// assert_eq!(result.title(), "Rust");
    /// assert_eq!(result.url(), "https://www.rust-lang.org/");
    /// ```
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }

    /// Returns the result title as shown by the provider.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the destination URL (redirect wrappers already removed).
    pub fn url(&self) -> &str {
        &self.url
    }
}
