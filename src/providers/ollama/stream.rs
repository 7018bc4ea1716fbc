//! Pull-based cursor over a streaming chat response.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::frame::LineDecoder;
use super::models::OllamaStreamEvent;
use crate::models::StreamStats;
use crate::providers::types::{ChatError, ChatResponse};

/// Invoked once, when the final event of a stream arrives.
pub type StatsCallback = Box<dyn FnOnce(StreamStats) + Send>;

type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// Yields text fragments one at a time with [`ChatStream::next`].
///
/// Dropping the cursor or cancelling the token from
/// [`ChatStream::cancel_token`] releases the connection. Once cancelled,
/// `next` returns `None` and no further fragment is produced.
pub struct ChatStream {
    body: Option<ByteStream>,
    decoder: LineDecoder,
    lines: VecDeque<String>,
    started: Instant,
    bytes_read: usize,
    tokens: u64,
    done: bool,
    stats: Option<StreamStats>,
    on_stats: Option<StatsCallback>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("open", &self.body.is_some())
            .field("buffered_lines", &self.lines.len())
            .field("tokens", &self.tokens)
            .field("done", &self.done)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ChatStream {
    /// `started` is when the request was issued; response time is measured
    /// from there.
    pub fn new<S>(body: S, started: Instant, on_stats: Option<StatsCallback>) -> Self
    where
        S: Stream<Item = Result<Bytes, ChatError>> + Send + 'static,
    {
        Self {
            body: Some(body.boxed()),
            decoder: LineDecoder::new(),
            lines: VecDeque::new(),
            started,
            bytes_read: 0,
            tokens: 0,
            done: false,
            stats: None,
            on_stats,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_response(
        response: reqwest::Response,
        started: Instant,
        on_stats: Option<StatsCallback>,
    ) -> Self {
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ChatError::StreamInterrupted(e.to_string())));
        Self::new(body, started, on_stats)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Let an externally owned token abort this stream.
    pub fn set_cancel_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    /// Set once the final event has been seen.
    pub fn stats(&self) -> Option<StreamStats> {
        self.stats
    }

    /// Next text fragment. `None` once the stream is finished or cancelled;
    /// `Some(Err(_))` at most once, after which the stream is finished.
    pub async fn next(&mut self) -> Option<Result<String, ChatError>> {
        loop {
            if self.cancel.is_cancelled() {
                self.close();
                return None;
            }

            while let Some(line) = self.lines.pop_front() {
                if let Some(fragment) = self.handle_line(&line) {
                    return Some(Ok(fragment));
                }
            }

            let read = {
                let body = self.body.as_mut()?;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    chunk = body.next() => Some(chunk),
                }
            };

            match read {
                None => {
                    tracing::debug!("Chat stream cancelled after {} fragments", self.tokens);
                    self.close();
                    return None;
                }
                Some(None) => return self.end_of_body(),
                Some(Some(Err(e))) => {
                    tracing::warn!("Chat stream failed: {}", e);
                    self.close();
                    return Some(Err(e));
                }
                Some(Some(Ok(bytes))) => {
                    self.bytes_read += bytes.len();
                    self.lines.extend(self.decoder.push(&bytes));
                }
            }
        }
    }

    /// Drain every remaining fragment into one response.
    pub async fn collect_response(mut self) -> Result<ChatResponse, ChatError> {
        let mut content = String::new();
        while let Some(fragment) = self.next().await {
            content.push_str(&fragment?);
        }

        let stats = self
            .stats
            .unwrap_or_else(|| StreamStats::compute(self.tokens, self.started.elapsed()));
        Ok(ChatResponse { content, stats })
    }

    fn handle_line(&mut self, line: &str) -> Option<String> {
        let event: OllamaStreamEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                let err = ChatError::MalformedFrame(e.to_string());
                tracing::warn!("Skipping NDJSON line: {} ({:?})", err, line);
                return None;
            }
        };

        let text = event.text();
        let fragment = if text.is_empty() {
            None
        } else {
            self.tokens += 1;
            Some(text.to_string())
        };

        if event.done {
            self.complete();
        }

        fragment
    }

    fn complete(&mut self) {
        self.done = true;
        let stats = StreamStats::compute(self.tokens, self.started.elapsed());
        self.stats = Some(stats);
        if let Some(on_stats) = self.on_stats.take() {
            on_stats(stats);
        }
        tracing::debug!(
            "Chat stream done: {} tokens in {}ms",
            stats.tokens_generated,
            stats.response_time_ms
        );
        self.close();
    }

    fn end_of_body(&mut self) -> Option<Result<String, ChatError>> {
        self.body = None;
        if let Some(rest) = self.decoder.finish() {
            tracing::warn!("Discarding unterminated frame of {} bytes", rest.len());
        }
        if self.bytes_read == 0 {
            return Some(Err(ChatError::EmptyResponseBody));
        }
        if !self.done {
            tracing::debug!("Chat stream ended without a final event");
        }
        None
    }

    fn close(&mut self) {
        self.body = None;
        self.lines.clear();
    }
}
