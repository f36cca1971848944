//! Private web search answered by a local model.
//!
//! A query runs through [`WebSearchClient`] (HTML results page), then
//! [`ContextAssembler`] (page fetch plus text extraction), then
//! [`ChatStreamer`] against a local Ollama server. [`ModelPuller`] and
//! [`OllamaClient::list_models`] manage the server's model catalog.
pub mod config;
pub mod context;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod ollama;
pub mod pipeline;
pub mod search;
pub mod spinner;

pub use config::{Config, ConfigBuilder, ConfigError};
pub use context::ContextAssembler;
pub use extract::ContentExtractor;
pub use fetch::{FetchError, FetchPage, PageFetcher};
pub use models::{Context, ModelInfo, PageExcerpt, SearchResult};
pub use ollama::{
    ChatOutcome, ChatRequest, ChatStreamer, ModelPuller, OllamaClient, OllamaClientBuilder,
    OllamaClientTrait, OllamaError, PullOutcome, PullProgress, PullUpdate,
};
pub use pipeline::{QueryObserver, QueryOutcome, QueryPipeline};
pub use search::{SearchError, WebSearchClient};
pub use spinner::Spinner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clients_constructible_from_crate_root() {
        let config = Config::default();
        assert!(WebSearchClient::new(&config).is_ok());
        assert!(PageFetcher::new(&config).is_ok());

        let client = OllamaClientBuilder::new().config(config).build();
        assert!(client.is_ok());
    }

    #[test]
    fn types_accessible_from_crate_root() {
        let result = SearchResult::new("Rust", "https://www.rust-lang.org/");
        let excerpt = PageExcerpt::new(1, &result, "A language empowering everyone.");
        let context = Context::from_excerpts(&[excerpt]);
        assert_eq!(context.source_count(), 1);

        let model = ModelInfo::new("llama3.2", Some(2_000_000_000));
        assert_eq!(model.name, "llama3.2");

        let extractor = ContentExtractor::new(10);
        assert_eq!(extractor.max_chars(), 10);
    }
}
