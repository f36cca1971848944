//! One query end to end: search, read the pages, stream the answer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError};
use crate::context::ContextAssembler;
use crate::fetch::{FetchPage, PageFetcher};
use crate::models::{Context, SearchResult};
use crate::ollama::{ChatOutcome, ChatRequest, ChatStreamer, OllamaClientTrait, OllamaError};
use crate::search::{SearchError, WebSearchClient};

/// Receives progress notices while a query runs.
///
/// Every method defaults to doing nothing.
pub trait QueryObserver {
    /// Search failed; the query continues without results.
    fn search_failed(&mut self, _error: &SearchError) {}

    fn no_results(&mut self) {}

    fn sources_found(&mut self, _results: &[SearchResult]) {}

    fn reading_pages(&mut self) {}

    /// Called right before the chat request is sent.
    fn answer_started(&mut self) {}

    fn fragment(&mut self, _text: &str) {}
}

/// Observer that ignores everything.
impl QueryObserver for () {}

/// How a query ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Answered {
        fragments: usize,
        sources: usize,
    },
    /// Cancelled while searching, reading pages or streaming the answer.
    Cancelled,
    /// Blank query; nothing was sent anywhere.
    Skipped,
}

/// Runs queries against the web and the local model.
pub struct QueryPipeline<F: FetchPage = PageFetcher> {
    search: WebSearchClient,
    assembler: ContextAssembler<F>,
    chat: ChatStreamer,
}

impl QueryPipeline<PageFetcher> {
    pub fn new(config: &Config, client: Arc<dyn OllamaClientTrait>) -> Result<Self, ConfigError> {
        let web = config.web_client()?;
        Ok(Self::from_parts(
            WebSearchClient::with_client(web.clone(), config),
            ContextAssembler::new(PageFetcher::with_client(web, config)),
            ChatStreamer::new(client, config),
        ))
    }
}

impl<F: FetchPage> QueryPipeline<F> {
    pub fn from_parts(search: WebSearchClient, assembler: ContextAssembler<F>, chat: ChatStreamer) -> Self {
        Self {
            search,
            assembler,
            chat,
        }
    }

    /// Shows the "Thinking..." spinner while waiting for the first fragment.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.chat = self.chat.with_progress(show);
        self
    }

    /// Answers `query` with `model`.
    ///
    /// Search failures are reported through `observer` and the query goes on
    /// with no results: the model is asked even when the context is empty.
    /// Only model server errors are returned.
    pub async fn run<O>(
        &self,
        query: &str,
        model: &str,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> Result<QueryOutcome, OllamaError>
    where
        O: QueryObserver + ?Sized,
    {
        let query = query.trim();
        if query.is_empty() {
            return Ok(QueryOutcome::Skipped);
        }

        let searched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(QueryOutcome::Cancelled),
            searched = self.search.search(query) => searched,
        };
        let results = match searched {
            Ok(results) => results,
            Err(e) => {
                log::warn!("search failed: {e}");
                observer.search_failed(&e);
                Vec::new()
            }
        };

        let context = if results.is_empty() {
            observer.no_results();
            Context::empty()
        } else {
            observer.sources_found(&results);
            observer.reading_pages();
            let Some(context) = self.assembler.assemble_until(&results, cancel).await else {
                return Ok(QueryOutcome::Cancelled);
            };
            context
        };

        observer.answer_started();
        let request = ChatRequest {
            query,
            context: &context,
            model,
        };
        let outcome = self
            .chat
            .stream(&request, cancel, |text| observer.fragment(text))
            .await?;

        Ok(match outcome {
            ChatOutcome::Cancelled { .. } => QueryOutcome::Cancelled,
            ChatOutcome::Completed { fragments } => QueryOutcome::Answered {
                fragments,
                sources: context.source_count(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ollama::EventStream;
    use async_trait::async_trait;
    use futures::{StreamExt, stream};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers every chat with fixed fragments and keeps the request bodies.
    #[derive(Default)]
    struct RecordingClient {
        bodies: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl OllamaClientTrait for RecordingClient {
        async fn stream_json(
            &self,
            _path: &str,
            body: serde_json::Value,
            _idle_timeout: Option<Duration>,
        ) -> Result<EventStream, OllamaError> {
            self.bodies.lock().unwrap().push(body);
            Ok(stream::iter(vec![
                Ok(json!({"message": {"content": "No "}})),
                Ok(json!({"message": {"content": "sources."}, "done": true})),
            ])
            .boxed())
        }
    }

    struct NeverFetch;

    #[async_trait]
    impl FetchPage for NeverFetch {
        async fn fetch_text(&self, _url: &str) -> String {
            std::future::pending::<()>().await;
            String::new()
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl QueryObserver for Recorder {
        fn search_failed(&mut self, _error: &SearchError) {
            self.events.push("search_failed".into());
        }
        fn no_results(&mut self) {
            self.events.push("no_results".into());
        }
        fn answer_started(&mut self) {
            self.events.push("answer_started".into());
        }
        fn fragment(&mut self, text: &str) {
            self.events.push(format!("fragment:{text}"));
        }
    }

    /// Search pointed at a closed local port so it fails fast.
    fn unreachable_config() -> Config {
        Config {
            search_url: "http://127.0.0.1:9/html/".to_string(),
            search_timeout: Duration::from_secs(2),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn search_failure_still_asks_the_model() {
        let client = Arc::new(RecordingClient::default());
        let pipeline = QueryPipeline::new(&unreachable_config(), client.clone()).unwrap();
        let mut recorder = Recorder::default();

        let outcome = pipeline
            .run("rust news", "llama3.2", &CancellationToken::new(), &mut recorder)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            QueryOutcome::Answered {
                fragments: 2,
                sources: 0
            }
        );
        assert_eq!(
            recorder.events,
            vec![
                "search_failed",
                "no_results",
                "answer_started",
                "fragment:No ",
                "fragment:sources."
            ]
        );

        let bodies = client.bodies.lock().unwrap();
        let user = bodies[0]["messages"][1]["content"].as_str().unwrap();
        assert!(user.starts_with("Web search context:\n\n\nQuestion: rust news"));
    }

    #[tokio::test]
    async fn blank_query_is_skipped() {
        let client = Arc::new(RecordingClient::default());
        let pipeline = QueryPipeline::new(&unreachable_config(), client.clone()).unwrap();

        let outcome = pipeline
            .run("   ", "llama3.2", &CancellationToken::new(), &mut ())
            .await
            .unwrap();

        assert_eq!(outcome, QueryOutcome::Skipped);
        assert!(client.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_search() {
        let client = Arc::new(RecordingClient::default());
        let config = unreachable_config();
        let pipeline = QueryPipeline::from_parts(
            WebSearchClient::new(&config).unwrap(),
            ContextAssembler::new(NeverFetch),
            ChatStreamer::new(client.clone(), &config),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut recorder = Recorder::default();

        let outcome = pipeline
            .run("rust news", "llama3.2", &cancel, &mut recorder)
            .await
            .unwrap();

        assert_eq!(outcome, QueryOutcome::Cancelled);
        assert!(recorder.events.is_empty());
        assert!(client.bodies.lock().unwrap().is_empty());
    }
}
