//! Error types for the memory subsystem.

/// Errors surfaced by the semantic memory and its record stores.
///
/// Index load failures never appear here: they are recovered by resetting the
/// index and the record store together (see [`crate::vector_index::IndexLoadError`]).
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// A stored or query vector does not have the configured dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// A vector component is NaN or infinite.
    #[error("vector component {index} is not finite")]
    NonFiniteComponent { index: usize },
    /// A record already exists for this vector id.  Indicates the index and
    /// the record store have diverged.
    #[error("duplicate memory record for vector id {0}")]
    DuplicateId(u64),
    /// Rejected memory settings (e.g. a zero embedding dimension).
    #[error("invalid memory configuration: {0}")]
    InvalidConfig(String),
    /// The embedding backend produced no vector for the text.
    #[error("embedding backend returned no vector")]
    EmbeddingUnavailable,
    /// Record table failure.
    #[error("record store error: {0}")]
    Storage(#[from] redb::Error),
    /// Record (de)serialisation failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::DatabaseError> for MemoryError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<redb::TransactionError> for MemoryError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<redb::TableError> for MemoryError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<redb::StorageError> for MemoryError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.into())
    }
}

impl From<redb::CommitError> for MemoryError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.into())
    }
}

pub type Result<T, E = MemoryError> = std::result::Result<T, E>;
