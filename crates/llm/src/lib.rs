//! Streaming chat completion against OpenAI-compatible endpoints.
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use recall_config::LlmConfig;

pub mod sse;

pub use sse::{MAX_LINE_BYTES, SseDecoder, SseEvent, parse_sse_line};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Result of one streamed completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Concatenation of every forwarded fragment.
    pub text: String,
    /// Non-empty fragments forwarded to the receiver.
    pub chunks: usize,
    /// `data:` lines that could not be used.
    pub malformed: usize,
}

/// A generation backend that streams its reply fragment by fragment.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `messages` and forward each content fragment to `tx` as it
    /// arrives.  A dropped receiver does not abort the stream; the full text
    /// is still returned.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<StreamOutcome>;
}

// ── Stream folding ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StreamCollector {
    outcome: StreamOutcome,
    done: bool,
}

impl StreamCollector {
    /// Fold one line into the outcome; returns the fragment to forward.
    fn feed_line(&mut self, line: &str) -> Option<String> {
        match parse_sse_line(line) {
            SseEvent::Delta(content) if content.is_empty() => None,
            SseEvent::Delta(content) => {
                self.outcome.text.push_str(&content);
                self.outcome.chunks += 1;
                Some(content)
            }
            SseEvent::Done => {
                self.done = true;
                None
            }
            SseEvent::Skip => None,
            SseEvent::Malformed(reason) => {
                self.outcome.malformed += 1;
                debug!(%reason, line, "skipping malformed stream line");
                None
            }
        }
    }

    /// Lines dropped by the decoder for exceeding its length limit.
    fn record_oversized(&mut self, count: usize) {
        if count > 0 {
            self.outcome.malformed += count;
            debug!(count, "skipping oversized stream line");
        }
    }

    fn finish(self, model: &str) -> StreamOutcome {
        if self.outcome.malformed > 0 {
            warn!(
                model,
                malformed = self.outcome.malformed,
                chunks = self.outcome.chunks,
                "completion stream contained malformed lines"
            );
        }
        if !self.done {
            debug!(model, "completion stream ended without [DONE]");
        }
        self.outcome
    }
}

// ── OpenAI-compatible client ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: config.api_key.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<StreamOutcome> {
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": true
        });

        let mut request = self.client.post(self.endpoint()).json(&payload);
        if !self.api_key.trim().is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let mut response = request
            .send()
            .await
            .with_context(|| format!("sending completion request to {}", self.endpoint()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("completion request failed ({status}): {body}");
        }

        let mut decoder = SseDecoder::default();
        let mut collector = StreamCollector::default();
        'read: while let Some(chunk) = response.chunk().await? {
            let lines = decoder.push(&chunk);
            collector.record_oversized(decoder.take_oversized());
            for line in lines {
                if let Some(fragment) = collector.feed_line(&line) {
                    let _ = tx.send(fragment).await;
                }
                if collector.done {
                    break 'read;
                }
            }
        }
        if !collector.done {
            if let Some(line) = decoder.finish() {
                if let Some(fragment) = collector.feed_line(&line) {
                    let _ = tx.send(fragment).await;
                }
            }
        }

        Ok(collector.finish(&self.model))
    }
}
