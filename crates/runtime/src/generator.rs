//! Memory-augmented generation: one user turn in, one streamed reply out.
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use recall_llm::{ChatBackend, ChatMessage};
use recall_memory::{ContextMessage, EmbedFn, MemoryService, Role};

/// Summary of one generation, with the derived engagement metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub text: String,
    /// Id of the stored response, or `None` when it could not be remembered.
    pub memory_id: Option<u64>,
    /// Number of messages sent to the backend.
    pub context_messages: usize,
    pub response_time_secs: f64,
    /// Response length over prompt length, in characters.
    pub prompt_effectiveness: f64,
    /// Response length in hundreds of characters.
    pub engagement_score: f64,
    pub malformed_chunks: usize,
}

pub struct ContentGenerator {
    memory: Arc<MemoryService>,
    backend: Arc<dyn ChatBackend>,
    embed_fn: EmbedFn,
    k: usize,
}

impl ContentGenerator {
    pub fn new(memory: Arc<MemoryService>, backend: Arc<dyn ChatBackend>, embed_fn: EmbedFn) -> Self {
        let k = memory.default_k();
        Self {
            memory,
            backend,
            embed_fn,
            k,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn memory(&self) -> &Arc<MemoryService> {
        &self.memory
    }

    /// Record `prompt`, build its context, stream the reply to `tx` and
    /// write the completed reply back to memory.
    ///
    /// Failing to remember the reply is logged and reflected in
    /// [`GenerationReport::memory_id`]; the text has already been delivered.
    pub async fn generate(
        &self,
        owner_id: &str,
        session_id: &str,
        prompt: &str,
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationReport> {
        self.memory.record_turn(session_id, Role::User, prompt);
        let context = self
            .memory
            .remember_and_recall(owner_id, session_id, prompt, &self.embed_fn, self.k)
            .await
            .context("building generation context")?;
        let messages = to_chat_messages(&context);

        let start = Instant::now();
        let outcome = self
            .backend
            .stream_chat(&messages, tx)
            .await
            .context("streaming completion")?;
        let response_time_secs = round_to(start.elapsed().as_secs_f64(), 3);

        let memory_id = match self
            .memory
            .record_response(owner_id, session_id, &outcome.text, &self.embed_fn)
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(owner_id, session_id, error = %err, "failed to remember generated response");
                None
            }
        };

        let response_len = outcome.text.chars().count() as f64;
        let prompt_len = prompt.chars().count().max(1) as f64;
        let report = GenerationReport {
            memory_id,
            context_messages: messages.len(),
            response_time_secs,
            prompt_effectiveness: round_to(response_len / prompt_len, 2),
            engagement_score: round_to(response_len / 100.0, 2),
            malformed_chunks: outcome.malformed,
            text: outcome.text,
        };
        info!(
            owner_id,
            session_id,
            memory_id = ?report.memory_id,
            context_messages = report.context_messages,
            response_time_secs = report.response_time_secs,
            prompt_effectiveness = report.prompt_effectiveness,
            engagement_score = report.engagement_score,
            malformed_chunks = report.malformed_chunks,
            "generation complete"
        );
        Ok(report)
    }
}

fn to_chat_messages(context: &[ContextMessage]) -> Vec<ChatMessage> {
    context
        .iter()
        .map(|m| ChatMessage::new(m.role.as_str(), m.content.clone()))
        .collect()
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}
