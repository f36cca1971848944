//! Line-delimited JSON decoding over a streamed HTTP body.
//!
//! The model server answers streaming requests with one JSON value per line.
//! Bytes are split on `\n` as they arrive and every complete line is decoded
//! on its own; a line that does not decode is skipped, never fatal.

use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

use super::client::OllamaError;

/// Accumulates body bytes and hands out complete lines.
///
/// Bytes are kept until a newline arrives, so multi-byte characters split
/// across chunks survive intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed, without terminators.
    ///
    /// Only the new bytes are scanned: `pending` never holds a newline between calls.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut search = self.pending.len();
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[search..].iter().position(|b| *b == b'\n') {
            let end = search + offset;
            lines.push(to_line(&self.pending[start..end]));
            start = end + 1;
            search = start;
        }
        self.pending.drain(..start);
        lines
    }

    /// Returns the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(to_line(&raw))
    }
}

fn to_line(raw: &[u8]) -> String {
    let line = String::from_utf8_lossy(raw);
    line.trim_end_matches('\r').to_string()
}

/// Decodes one line, returning `None` for blank or malformed input.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Option<T> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            log::trace!("skipping undecodable stream line ({e}): {line}");
            None
        }
    }
}

struct Decoder<B> {
    bytes: BoxStream<'static, Result<B, reqwest::Error>>,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    idle_timeout: Option<Duration>,
    exhausted: bool,
}

impl<B> Decoder<B> {
    async fn next_chunk(&mut self) -> Result<Option<B>, OllamaError> {
        let next = match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.bytes.next())
                .await
                .map_err(|_| OllamaError::Timeout)?,
            None => self.bytes.next().await,
        };
        next.transpose().map_err(OllamaError::from_reqwest)
    }
}

/// Turns a body byte stream into a lazy stream of decoded JSON values.
///
/// The returned stream is single-pass: nothing is read from `bytes` until the
/// consumer asks for the next item, and only as much as needed to complete the
/// next decodable line. When `idle_timeout` is set, waiting longer than that
/// for the next chunk yields [`OllamaError::Timeout`]. A transport error is
/// yielded once and ends the stream.
///
/// Dropping the returned stream drops `bytes`, which releases the connection.
pub fn json_lines<S, B, T>(bytes: S, idle_timeout: Option<Duration>) -> BoxStream<'static, Result<T, OllamaError>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let decoder = Decoder {
        bytes: bytes.boxed(),
        buffer: LineBuffer::new(),
        ready: VecDeque::new(),
        idle_timeout,
        exhausted: false,
    };

    stream::unfold(decoder, |mut decoder| async move {
        loop {
            while let Some(line) = decoder.ready.pop_front() {
                if let Some(value) = decode_line::<T>(&line) {
                    return Some((Ok(value), decoder));
                }
            }
            if decoder.exhausted {
                return None;
            }
            match decoder.next_chunk().await {
                Ok(Some(chunk)) => {
                    let lines = decoder.buffer.push(chunk.as_ref());
                    decoder.ready.extend(lines);
                }
                Ok(None) => {
                    decoder.exhausted = true;
                    let tail = decoder.buffer.finish();
                    decoder.ready.extend(tail);
                }
                Err(e) => {
                    decoder.exhausted = true;
                    decoder.ready.clear();
                    return Some((Err(e), decoder));
                }
            }
        }
    })
    .boxed()
}
