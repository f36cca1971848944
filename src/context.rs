//! Context assembly: fetch each search result and concatenate the excerpts.

use tokio_util::sync::CancellationToken;

use crate::fetch::{FetchPage, PageFetcher};
use crate::models::{Context, PageExcerpt, SearchResult};

/// Builds the model's context from ranked search results.
///
/// Pages are fetched one at a time in rank order, so source numbering always
/// matches the result list.
pub struct ContextAssembler<F: FetchPage = PageFetcher> {
    fetcher: F,
}

impl<F: FetchPage> ContextAssembler<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// One excerpt per result, numbered from 1. Unfetchable pages have empty text.
    ///
    /// Gives up with `None` as soon as `cancel` fires, abandoning the fetch in flight.
    pub async fn excerpts_until(
        &self,
        results: &[SearchResult],
        cancel: &CancellationToken,
    ) -> Option<Vec<PageExcerpt>> {
        let mut excerpts = Vec::with_capacity(results.len());
        for (i, result) in results.iter().enumerate() {
            let text = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                text = self.fetcher.fetch_text(result.url()) => text,
            };
            if text.is_empty() {
                log::debug!("no usable text from {}", result.url());
            }
            excerpts.push(PageExcerpt::new(i + 1, result, text));
        }
        Some(excerpts)
    }

    /// Concatenates the non-empty excerpts; an empty result list gives an empty context.
    pub async fn assemble(&self, results: &[SearchResult]) -> Context {
        self.assemble_until(results, &CancellationToken::new())
            .await
            .unwrap_or_default()
    }

    /// Cancellable [`assemble`](Self::assemble).
    pub async fn assemble_until(
        &self,
        results: &[SearchResult],
        cancel: &CancellationToken,
    ) -> Option<Context> {
        let excerpts = self.excerpts_until(results, cancel).await?;
        let context = Context::from_excerpts(&excerpts);
        log::debug!(
            "assembled context from {}/{} pages ({} chars)",
            context.source_count(),
            results.len(),
            context.as_str().chars().count()
        );
        Some(context)
    }
}
