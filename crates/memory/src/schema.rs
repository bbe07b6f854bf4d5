use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire label used in chat completion payloads and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Text and ownership backing one vector in the index.
///
/// `vector_id` is the position of the vector in the index; the two id spaces
/// are kept in 1:1 correspondence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub vector_id: u64,
    pub owner_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(vector_id: u64, owner_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            vector_id,
            owner_id: owner_id.into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// A recalled memory, ranked by squared L2 distance to the query.
///
/// `distance` is not a similarity score: it is unbounded and smaller means
/// closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMatch {
    pub vector_id: u64,
    pub text: String,
    pub distance: f32,
}

/// One turn held in a session's sliding window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferEntry {
    pub role: Role,
    pub content: String,
}

impl BufferEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A role/content pair in the order it is sent to generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}
