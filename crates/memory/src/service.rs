//! The two calls the generation workflow makes into memory, plus the
//! write-back of completed responses.
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use recall_config::MemoryConfig;

use crate::buffer::{BufferSettings, SessionBuffers};
use crate::context::assemble;
use crate::error::{MemoryError, Result};
use crate::schema::{ContextMessage, MemoryMatch, Role};
use crate::semantic::SemanticMemory;

/// An async function that maps a text string to an optional embedding vector.
/// Stored as an `Arc` so it can be cloned across structs.  The returned future
/// is `Send + 'static` so it can be spawned or `.await`ed anywhere.
pub type EmbedFn = Arc<dyn Fn(String) -> EmbedFuture + Send + Sync>;

/// Future returned by an [`EmbedFn`].
pub type EmbedFuture = Pin<Box<dyn Future<Output = Option<Vec<f32>>> + Send>>;

pub struct MemoryService {
    semantic: Arc<SemanticMemory>,
    buffers: SessionBuffers,
    default_k: usize,
}

impl MemoryService {
    pub async fn open(config: &MemoryConfig) -> Result<Self> {
        let semantic = SemanticMemory::open(config).await?;
        Ok(Self::new(
            Arc::new(semantic),
            SessionBuffers::new(BufferSettings::from_config(config)),
            config.default_k,
        ))
    }

    pub fn new(semantic: Arc<SemanticMemory>, buffers: SessionBuffers, default_k: usize) -> Self {
        Self {
            semantic,
            buffers,
            default_k,
        }
    }

    pub fn semantic(&self) -> &Arc<SemanticMemory> {
        &self.semantic
    }

    pub fn buffers(&self) -> &SessionBuffers {
        &self.buffers
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn record_turn(&self, session_id: &str, role: Role, text: &str) {
        self.buffers.append(session_id, role, text);
    }

    /// Embed `text`, recall the `k` nearest memories and merge them with the
    /// session's recent turns.
    pub async fn remember_and_recall(
        &self,
        owner_id: &str,
        session_id: &str,
        text: &str,
        embed_fn: &EmbedFn,
        k: usize,
    ) -> Result<Vec<ContextMessage>> {
        let matches = self.recall(text, embed_fn, k).await?;
        let turns = self.buffers.read(session_id);
        debug!(
            owner_id,
            session_id,
            recalled = matches.len(),
            turns = turns.len(),
            "context assembled"
        );
        Ok(assemble(&matches, &turns))
    }

    /// Nearest stored memories for `text`.
    pub async fn recall(&self, text: &str, embed_fn: &EmbedFn, k: usize) -> Result<Vec<MemoryMatch>> {
        let query = embed(embed_fn, text).await?;
        self.semantic.search_memory(&query, k).await
    }

    /// Embed `text` and store it as a long-term memory of `owner_id`.
    pub async fn remember(&self, owner_id: &str, text: &str, embed_fn: &EmbedFn) -> Result<u64> {
        let vector = embed(embed_fn, text).await?;
        self.semantic.add_memory(owner_id, text, &vector).await
    }

    /// Record a completed assistant response in the session window and in
    /// long-term memory.  The turn is buffered even when embedding fails.
    pub async fn record_response(
        &self,
        owner_id: &str,
        session_id: &str,
        text: &str,
        embed_fn: &EmbedFn,
    ) -> Result<u64> {
        self.record_turn(session_id, Role::Assistant, text);
        self.remember(owner_id, text, embed_fn).await
    }
}

async fn embed(embed_fn: &EmbedFn, text: &str) -> Result<Vec<f32>> {
    embed_fn(text.to_string())
        .await
        .ok_or(MemoryError::EmbeddingUnavailable)
}
