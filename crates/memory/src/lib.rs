//! Conversation memory: a long-term semantic store searched by vector
//! similarity and a short-term sliding window of recent turns per session.

pub mod buffer;
pub mod context;
pub mod error;
pub mod redb_store;
pub mod schema;
pub mod semantic;
pub mod service;
pub mod store;
pub mod vector_index;

pub use buffer::{BufferSettings, SessionBuffers};
pub use context::assemble;
pub use error::MemoryError;
pub use redb_store::{RecordCacheStats, RedbRecordStore};
pub use schema::{BufferEntry, ContextMessage, MemoryMatch, MemoryRecord, Role};
pub use semantic::{SemanticMemory, SemanticSettings, SemanticStats};
pub use service::{EmbedFn, EmbedFuture, MemoryService};
pub use store::{InMemoryRecordStore, RecordStore};
pub use vector_index::VectorIndex;
