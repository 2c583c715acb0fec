//! # API Module
//!
//! This module handles interactions with an Ollama-compatible model server:
//! listing the models it serves and streaming chat completions.
//!
//! The server speaks newline-delimited JSON. A chat request posts
//! `{model, messages, stream: true}` to `/api/chat` and the response body is
//! a sequence of fragments, each optionally carrying
//! `{"message": {"content": "<delta>"}}`, terminated by a fragment with
//! `"done": true`.
//!
//! [`ChatStream`] turns that body into a `futures::Stream` of
//! [`StreamSnapshot`]s. Each snapshot carries the *accumulated* response so
//! far, already run through the content sanitizer, so a consumer can simply
//! repaint the visible partial message on every item:
//!
//! - `(Some(text), false)` for every decoded fragment,
//! - one `(Some(text), true)` when the server signals end-of-stream (or the
//!   connection naturally ends),
//! - a single `(None, true)` sentinel when the request or connection fails.
//!   Nothing derived from a failed stream should be persisted.
//!
//! Undecodable fragments are skipped silently and the stream continues. A
//! fixed 60-second ceiling bounds the whole request; there is no retry.

use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::{
    error::{OllieError, Result},
    models::ChatMessage,
    sanitize,
};

/// Upper bound on a single request, covering the connection and the whole
/// streamed body. A stuck stream is terminated by this ceiling; there is no
/// user-initiated abort.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for one Ollama-compatible server address.
///
/// Cheap to construct; the session controller builds one per turn from the
/// currently selected server address.
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

/// Response from the server's `/api/tags` endpoint.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

/// Model metadata from `/api/tags`; only the name is of interest here.
#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Request structure for the chat endpoint.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// One decoded fragment of a streamed chat response.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// One item yielded by [`ChatStream`].
///
/// `content` is the sanitized, accumulated response text; `None` together
/// with `is_final == true` is the failure sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSnapshot {
    pub content: Option<String>,
    pub is_final: bool,
}

impl OllamaClient {
    /// Create a client for `server_addr` (a `host:port` pair).
    ///
    /// # Errors
    /// Returns [`OllieError::Server`] if the HTTP client cannot be built.
    pub fn new(server_addr: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OllieError::Server(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: format!("http://{server_addr}"),
        })
    }

    /// Fetch the names of all models the server can chat with.
    ///
    /// # Errors
    /// Returns [`OllieError::Server`] when the server is unreachable,
    /// responds with a non-success status, or returns an unparsable listing.
    /// Callers treat that as "no models available" and block sending.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        debug!("fetching models from {url}");

        let response = self.http.get(&url).send().await.map_err(|e| {
            warn!("failed to reach model server: {e}");
            OllieError::Server(format!("failed to reach {url}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OllieError::Server(format!(
                "model listing returned {status}"
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| OllieError::Server(format!("failed to parse model listing: {e}")))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Open a streaming chat request.
    ///
    /// The request carries the full `history` plus `prompt` appended as a
    /// new user message. This always returns a [`ChatStream`]; request-level
    /// failures (connection refused, timeout before the response) surface as
    /// the stream's failure sentinel so the caller sees a single shape.
    ///
    /// # Parameters
    /// - `model`: Model identifier known to the server.
    /// - `history`: Ordered prior messages of the conversation.
    /// - `prompt`: The new user turn.
    pub async fn stream_chat(&self, model: &str, history: &[ChatMessage], prompt: &str) -> ChatStream {
        let url = format!("{}/api/chat", self.base_url);

        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(prompt));
        let request = ChatRequest {
            model,
            messages,
            stream: true,
        };
        debug!(
            "streaming chat: model={model}, {} messages",
            request.messages.len()
        );

        match self.http.post(&url).json(&request).send().await {
            Ok(response) if response.status().is_success() => {
                ChatStream::new(response.bytes_stream())
            }
            Ok(response) => {
                error!("chat endpoint returned {}", response.status());
                ChatStream::failed()
            }
            Err(e) => {
                error!("chat request failed: {e}");
                ChatStream::failed()
            }
        }
    }
}

/// A finite, non-restartable stream of [`StreamSnapshot`]s for one turn.
///
/// Decodes the newline-delimited body incrementally: bytes are buffered
/// until a complete line is available, each line is parsed as a
/// [`ChatChunk`], and every content delta extends the accumulated buffer.
/// The accumulated text is sanitized before each yield.
pub struct ChatStream {
    inner: Option<Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>>,
    line_buf: Vec<u8>,
    raw: String,
    pending: VecDeque<StreamSnapshot>,
    finished: bool,
}

impl ChatStream {
    fn new(body: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Some(Box::pin(body)),
            line_buf: Vec::new(),
            raw: String::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// A stream that yields only the failure sentinel.
    fn failed() -> Self {
        Self {
            inner: None,
            line_buf: Vec::new(),
            raw: String::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

/// Split off every complete line in `line_buf` and absorb it.
///
/// Stops at the end-of-stream marker; anything buffered after it is
/// discarded.
fn drain_complete_lines(
    line_buf: &mut Vec<u8>,
    raw: &mut String,
    pending: &mut VecDeque<StreamSnapshot>,
) {
    while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = line_buf.drain(..=pos).collect();
        if absorb_line(&line[..pos], raw, pending) {
            line_buf.clear();
            break;
        }
    }
}

/// Parse one fragment line, extending `raw` and queueing snapshots.
///
/// Returns `true` when the line carried the end-of-stream marker.
/// Undecodable lines are skipped.
fn absorb_line(line: &[u8], raw: &mut String, pending: &mut VecDeque<StreamSnapshot>) -> bool {
    if line.iter().all(u8::is_ascii_whitespace) {
        return false;
    }

    let chunk: ChatChunk = match serde_json::from_slice(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("skipping undecodable fragment: {e}");
            return false;
        }
    };

    let mut grew = false;
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            raw.push_str(&message.content);
            grew = true;
        }
    }

    if chunk.done {
        pending.push_back(StreamSnapshot {
            content: Some(sanitize::process_message(raw)),
            is_final: true,
        });
        return true;
    }

    if grew {
        pending.push_back(StreamSnapshot {
            content: Some(sanitize::process_message(raw)),
            is_final: false,
        });
    }
    false
}

impl Stream for ChatStream {
    type Item = StreamSnapshot;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(snapshot) = this.pending.pop_front() {
                if snapshot.is_final {
                    this.finished = true;
                    this.inner = None;
                }
                return Poll::Ready(Some(snapshot));
            }

            if this.finished {
                return Poll::Ready(None);
            }

            let Some(inner) = this.inner.as_mut() else {
                // Request-level failure: one sentinel, then the end.
                this.finished = true;
                return Poll::Ready(Some(StreamSnapshot {
                    content: None,
                    is_final: true,
                }));
            };

            match inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.line_buf.extend_from_slice(&chunk);
                    drain_complete_lines(&mut this.line_buf, &mut this.raw, &mut this.pending);
                }
                Poll::Ready(Some(Err(e))) => {
                    error!("stream aborted: {e}");
                    this.pending.push_back(StreamSnapshot {
                        content: None,
                        is_final: true,
                    });
                }
                Poll::Ready(None) => {
                    // Connection ended without a done marker: flush any
                    // trailing partial line and finish with what we have.
                    let leftover = std::mem::take(&mut this.line_buf);
                    let saw_done = absorb_line(&leftover, &mut this.raw, &mut this.pending);
                    if !saw_done {
                        this.pending.push_back(StreamSnapshot {
                            content: Some(sanitize::process_message(&this.raw)),
                            is_final: true,
                        });
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use httpmock::prelude::*;

    fn setup() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    fn snapshot(content: &str, is_final: bool) -> StreamSnapshot {
        StreamSnapshot {
            content: Some(content.to_string()),
            is_final,
        }
    }

    async fn collect(mut stream: ChatStream) -> Vec<StreamSnapshot> {
        let mut got = Vec::new();
        while let Some(s) = stream.next().await {
            got.push(s);
        }
        got
    }

    #[tokio::test]
    async fn test_list_models() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tags");
                then.status(200).body(
                    r#"{"models":[{"name":"llama3.2:latest"},{"name":"qwen2.5:7b"}]}"#,
                );
            })
            .await;

        let client = OllamaClient::new(&server.address().to_string()).unwrap();
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.2:latest", "qwen2.5:7b"]);
    }

    #[tokio::test]
    async fn test_list_models_unreachable_server() {
        setup();
        let client = OllamaClient::new("127.0.0.1:9").unwrap();
        let result = client.list_models().await;
        assert!(matches!(result, Err(OllieError::Server(_))));
    }

    #[tokio::test]
    async fn test_stream_accumulates_fragments() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body(concat!(
                    "{\"message\":{\"content\":\"Hel\"}}\n",
                    "{\"message\":{\"content\":\"lo\"}}\n",
                    "{\"done\":true}\n",
                ));
            })
            .await;

        let client = OllamaClient::new(&server.address().to_string()).unwrap();
        let stream = client.stream_chat("m", &[], "hi").await;
        let got = collect(stream).await;

        assert_eq!(
            got,
            vec![
                snapshot("Hel", false),
                snapshot("Hello", false),
                snapshot("Hello", true),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_skips_undecodable_fragments() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body(concat!(
                    "{\"message\":{\"content\":\"a\"}}\n",
                    "this is not json\n",
                    "{\"message\":{\"content\":\"b\"}}\n",
                    "{\"done\":true}\n",
                ));
            })
            .await;

        let client = OllamaClient::new(&server.address().to_string()).unwrap();
        let got = collect(client.stream_chat("m", &[], "hi").await).await;

        assert_eq!(
            got,
            vec![
                snapshot("a", false),
                snapshot("ab", false),
                snapshot("ab", true),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_finishes_without_done_marker() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200)
                    .body("{\"message\":{\"content\":\"only\"}}\n");
            })
            .await;

        let client = OllamaClient::new(&server.address().to_string()).unwrap();
        let got = collect(client.stream_chat("m", &[], "hi").await).await;

        assert_eq!(got.last(), Some(&snapshot("only", true)));
    }

    #[tokio::test]
    async fn test_unreachable_server_yields_failure_sentinel() {
        setup();
        let client = OllamaClient::new("127.0.0.1:9").unwrap();
        let got = collect(client.stream_chat("m", &[], "hi").await).await;

        assert_eq!(
            got,
            vec![StreamSnapshot {
                content: None,
                is_final: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_http_error_status_yields_failure_sentinel() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(500).body("model not loaded");
            })
            .await;

        let client = OllamaClient::new(&server.address().to_string()).unwrap();
        let got = collect(client.stream_chat("m", &[], "hi").await).await;

        assert_eq!(
            got,
            vec![StreamSnapshot {
                content: None,
                is_final: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_streamed_svg_is_sanitized() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body(concat!(
                    "{\"message\":{\"content\":\"<svg width=\\\"4\\\" height=\\\"2\\\"></svg>\"}}\n",
                    "{\"done\":true}\n",
                ));
            })
            .await;

        let client = OllamaClient::new(&server.address().to_string()).unwrap();
        let got = collect(client.stream_chat("m", &[], "draw").await).await;

        let final_text = got.last().unwrap().content.as_deref().unwrap();
        assert!(final_text.contains(r#"viewBox="0 0 4 2""#));
        assert!(final_text.contains(r#"class="rendered-svg""#));
    }
}
