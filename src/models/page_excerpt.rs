use std::fmt;

use super::SearchResult;

/// Cleaned text taken from one search result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageExcerpt {
    source_index: usize,
    title: String,
    url: String,
    text: String,
}

impl PageExcerpt {
    /// Creates an excerpt for the result at 1-based position `source_index`.
    pub fn new(source_index: usize, result: &SearchResult, text: impl Into<String>) -> Self {
        Self {
            source_index,
            title: result.title().to_string(),
            url: result.url().to_string(),
            text: text.into(),
        }
    }

    pub fn source_index(&self) -> usize {
        self.source_index
    }

    /// Returns `true` if extraction produced no text.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Renders the labeled block that goes into the model prompt.
impl fmt::Display for PageExcerpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Source {}: {}\n{}\n\n{}\n\n",
            self.source_index, self.title, self.url, self.text
        )
    }
}

/// The assembled web context handed to the model.
///
/// Built once from the excerpts in source order and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    text: String,
    sources: usize,
}

impl Context {
    /// An empty context, used when search or every page fetch failed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Concatenates the non-empty excerpts in the order given.
    ///
    /// # Examples
    ///
    /// ```
    /// use reflexity::{Context, PageExcerpt, SearchResult};
    ///
    /// let result = SearchResult::new("Title", "https://example.com");
    /// let excerpts = vec![
    ///     PageExcerpt::new(1, &result, "body"),
    ///     PageExcerpt::new(2, &result, ""),
    /// ];
    /// let context = Context::from_excerpts(&excerpts);
    /// assert_eq!(context.as_str(), "Source 1: Title\nhttps://example.com\n\nbody\n\n");
    /// assert_eq!(context.source_count(), 1);
    /// ```
    pub fn from_excerpts(excerpts: &[PageExcerpt]) -> Self {
        let mut text = String::new();
        let mut sources = 0;
        for excerpt in excerpts.iter().filter(|e| !e.is_empty()) {
            text.push_str(&excerpt.to_string());
            sources += 1;
        }
        Self { text, sources }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of excerpts that made it into the context.
    pub fn source_count(&self) -> usize {
        self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
