//! Streaming chat completion over the web context.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::client::{EventStream, OllamaClientTrait, OllamaError};
use crate::config::Config;
use crate::models::Context;
use crate::spinner::Spinner;

pub(crate) const CHAT_PATH: &str = "/api/chat";

const SYSTEM_PROMPT: &str = "Answer the user's question using the web search context provided with it.\n\n\
Be detailed, accurate and thorough, and rely only on information found in that context.\n\n\
When the context does not cover something, say so plainly (for example: \"The sources don't provide details on that\").\n\n\
Write the answer as natural, readable plain text.";

const THINKING_LABEL: &str = "Thinking...";

/// One decoded line of a `/api/chat` stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatEvent {
    #[serde(default)]
    message: Option<ChatEventMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct ChatEventMessage {
    #[serde(default)]
    content: String,
}

impl ChatEvent {
    /// Text fragment carried by this event (empty when none).
    pub fn content(&self) -> &str {
        self.message.as_ref().map_or("", |m| m.content.as_str())
    }

    /// `true` on the event that ends a normal stream.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

/// Inputs of one chat turn.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub query: &'a str,
    pub context: &'a Context,
    pub model: &'a str,
}

impl ChatRequest<'_> {
    /// The user message: web context first, then the question.
    pub fn user_prompt(&self) -> String {
        format!(
            "Web search context:\n{}\n\nQuestion: {}\n\nAnswer using the context.",
            self.context.as_str(),
            self.query
        )
    }

    fn body(&self) -> Result<serde_json::Value, OllamaError> {
        let user_prompt = self.user_prompt();
        let body = ChatBody {
            model: self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            stream: true,
        };
        serde_json::to_value(&body).map_err(OllamaError::Serialization)
    }
}

/// How a chat stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    /// The server finished (with or without an explicit `done` event).
    Completed { fragments: usize },
    /// The caller cancelled; no fragment was emitted after that point.
    Cancelled { fragments: usize },
}

impl ChatOutcome {
    pub fn fragments(&self) -> usize {
        match self {
            ChatOutcome::Completed { fragments } | ChatOutcome::Cancelled { fragments } => *fragments,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatOutcome::Cancelled { .. })
    }
}

/// Streams a model's answer fragment by fragment, cancellable mid-flight.
pub struct ChatStreamer {
    client: Arc<dyn OllamaClientTrait>,
    idle_timeout: Duration,
    show_progress: bool,
}

impl ChatStreamer {
    /// Creates a streamer that talks to the model server through `client`.
    ///
    /// # Arguments
    ///
    /// * `client` - The model server client (or a test double)
    /// * `config` - Supplies the idle timeout between answer chunks
    ///
    /// The "Thinking..." spinner is off; see [`with_progress`](Self::with_progress).
    pub fn new(client: Arc<dyn OllamaClientTrait>, config: &Config) -> Self {
        Self {
            client,
            idle_timeout: config.chat_idle_timeout,
            show_progress: false,
        }
    }

    /// Shows a "Thinking..." spinner on stdout until the first fragment arrives.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Runs one chat turn, calling `on_fragment` for every non-empty text
    /// fragment in server order.
    ///
    /// When `cancel` fires, the spinner is joined, the connection is dropped and
    /// `ChatOutcome::Cancelled` is returned; `on_fragment` is not called again.
    /// An `error` event ends the turn with [`OllamaError::Api`].
    pub async fn stream<F>(
        &self,
        request: &ChatRequest<'_>,
        cancel: &CancellationToken,
        mut on_fragment: F,
    ) -> Result<ChatOutcome, OllamaError>
    where
        F: FnMut(&str),
    {
        let body = request.body()?;
        let mut spinner = self.show_progress.then(|| Spinner::start(THINKING_LABEL));

        let result = self.run(body, cancel, &mut spinner, &mut on_fragment).await;

        stop_spinner(&mut spinner).await;
        result
    }

    async fn run<F>(
        &self,
        body: serde_json::Value,
        cancel: &CancellationToken,
        spinner: &mut Option<Spinner>,
        on_fragment: &mut F,
    ) -> Result<ChatOutcome, OllamaError>
    where
        F: FnMut(&str),
    {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.client.stream_json(CHAT_PATH, body, Some(self.idle_timeout)) => Some(opened),
        };
        let Some(opened) = opened else {
            return Ok(ChatOutcome::Cancelled { fragments: 0 });
        };
        let mut events: EventStream = opened?;

        let mut fragments = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = events.next() => Some(next),
            };
            let Some(next) = next else {
                stop_spinner(spinner).await;
                drop(events);
                return Ok(ChatOutcome::Cancelled { fragments });
            };

            let Some(value) = next.transpose()? else {
                break;
            };
            if let Some(error) = OllamaError::from_event(&value) {
                return Err(error);
            }
            let Ok(event) = serde_json::from_value::<ChatEvent>(value) else {
                continue;
            };

            let content = event.content();
            if !content.is_empty() {
                stop_spinner(spinner).await;
                on_fragment(content);
                fragments += 1;
            }
            if event.is_done() {
                break;
            }
        }

        Ok(ChatOutcome::Completed { fragments })
    }
}

async fn stop_spinner(spinner: &mut Option<Spinner>) {
    if let Some(spinner) = spinner.take() {
        spinner.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned events and records the request it received.
    struct ScriptedClient {
        events: Vec<Result<serde_json::Value, OllamaError>>,
        requests: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl ScriptedClient {
        fn new(events: Vec<serde_json::Value>) -> Arc<Self> {
            Arc::new(Self {
                events: events.into_iter().map(Ok).collect(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl OllamaClientTrait for ScriptedClient {
        async fn stream_json(
            &self,
            path: &str,
            body: serde_json::Value,
            _idle_timeout: Option<Duration>,
        ) -> Result<EventStream, OllamaError> {
            self.requests.lock().unwrap().push((path.to_string(), body));
            let events: Vec<_> = self
                .events
                .iter()
                .map(|e| match e {
                    Ok(v) => Ok(v.clone()),
                    Err(_) => Err(OllamaError::Timeout),
                })
                .collect();
            Ok(stream::iter(events).boxed())
        }
    }

    fn streamer(client: Arc<ScriptedClient>) -> ChatStreamer {
        ChatStreamer::new(client, &Config::default())
    }

    fn request<'a>(context: &'a Context) -> ChatRequest<'a> {
        ChatRequest {
            query: "what is rust?",
            context,
            model: "llama3.2",
        }
    }

    #[test]
    fn chat_event_reads_content_and_done() {
        let event: ChatEvent =
            serde_json::from_str(r#"{"model":"m","message":{"role":"assistant","content":"Hi"},"done":false}"#)
                .unwrap();
        assert_eq!(event.content(), "Hi");
        assert!(!event.is_done());

        let last: ChatEvent = serde_json::from_str(r#"{"done":true,"total_duration":123}"#).unwrap();
        assert_eq!(last.content(), "");
        assert!(last.is_done());
    }

    #[test]
    fn request_body_has_system_and_user_messages() {
        let context = Context::empty();
        let body = request(&context).body().unwrap();

        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("Question: what is rust?"));
    }

    #[tokio::test]
    async fn emits_fragments_in_order_and_skips_empty_content() {
        let client = ScriptedClient::new(vec![
            json!({"message": {"content": "Rust "}, "done": false}),
            json!({"message": {"content": ""}, "done": false}),
            json!({"unexpected": "shape"}),
            json!({"message": {"content": "is fast."}, "done": false}),
            json!({"message": {"content": ""}, "done": true}),
        ]);
        let context = Context::empty();
        let mut out = Vec::new();

        let outcome = streamer(client.clone())
            .stream(&request(&context), &CancellationToken::new(), |t| out.push(t.to_string()))
            .await
            .unwrap();

        assert_eq!(out, vec!["Rust ", "is fast."]);
        assert_eq!(outcome, ChatOutcome::Completed { fragments: 2 });
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].0, CHAT_PATH);
    }

    #[tokio::test]
    async fn stream_without_done_event_ends_normally() {
        let client = ScriptedClient::new(vec![json!({"message": {"content": "partial"}})]);
        let context = Context::empty();

        let outcome = streamer(client)
            .stream(&request(&context), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome, ChatOutcome::Completed { fragments: 1 });
    }

    #[tokio::test]
    async fn events_after_done_are_ignored() {
        let client = ScriptedClient::new(vec![
            json!({"message": {"content": "a"}, "done": true}),
            json!({"message": {"content": "b"}, "done": false}),
        ]);
        let context = Context::empty();
        let mut out = String::new();

        streamer(client)
            .stream(&request(&context), &CancellationToken::new(), |t| out.push_str(t))
            .await
            .unwrap();

        assert_eq!(out, "a");
    }

    #[tokio::test]
    async fn error_event_aborts_with_api_error() {
        let client = ScriptedClient::new(vec![
            json!({"message": {"content": "a"}}),
            json!({"error": "model runner crashed"}),
            json!({"message": {"content": "b"}}),
        ]);
        let context = Context::empty();
        let mut out = String::new();

        let result = streamer(client)
            .stream(&request(&context), &CancellationToken::new(), |t| out.push_str(t))
            .await;

        match result {
            Err(OllamaError::Api { message }) => assert_eq!(message, "model runner crashed"),
            other => panic!("expected Api error, got {other:?}"),
        }
        assert_eq!(out, "a");
    }

    #[tokio::test]
    async fn cancellation_stops_fragments_immediately() {
        let client = ScriptedClient::new(vec![
            json!({"message": {"content": "one"}}),
            json!({"message": {"content": "two"}}),
            json!({"message": {"content": "three"}}),
        ]);
        let context = Context::empty();
        let cancel = CancellationToken::new();
        let mut out = Vec::new();

        let outcome = streamer(client)
            .stream(&request(&context), &cancel, |t| {
                out.push(t.to_string());
                cancel.cancel();
            })
            .await
            .unwrap();

        assert_eq!(out, vec!["one"]);
        assert_eq!(outcome, ChatOutcome::Cancelled { fragments: 1 });
        assert!(outcome.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_token_sends_nothing() {
        let client = ScriptedClient::new(vec![json!({"message": {"content": "one"}})]);
        let context = Context::empty();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = streamer(client.clone())
            .stream(&request(&context), &cancel, |_| panic!("no fragments expected"))
            .await
            .unwrap();

        assert_eq!(outcome, ChatOutcome::Cancelled { fragments: 0 });
        assert!(client.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_error_mid_stream_is_returned() {
        let client = Arc::new(ScriptedClient {
            events: vec![Ok(json!({"message": {"content": "a"}})), Err(OllamaError::Timeout)],
            requests: Mutex::new(Vec::new()),
        });
        let context = Context::empty();

        let result = streamer(client)
            .stream(&request(&context), &CancellationToken::new(), |_| {})
            .await;

        assert!(matches!(result, Err(OllamaError::Timeout)));
    }
}
