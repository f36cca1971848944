//! Ollama model server client.
//!
//! `client` holds the HTTP plumbing (health check, catalog, streaming POST),
//! `stream` the line-delimited JSON decoder, and `chat` / `pull` the two
//! consumers of the event stream.
mod chat;
mod client;
mod pull;
mod stream;

pub use chat::{ChatEvent, ChatOutcome, ChatRequest, ChatStreamer};
pub use client::{EventStream, OllamaClient, OllamaClientBuilder, OllamaClientTrait, OllamaError};
pub use pull::{ModelPuller, PullEvent, PullOutcome, PullProgress, PullTracker, PullUpdate};
pub use stream::{LineBuffer, decode_line, json_lines};
