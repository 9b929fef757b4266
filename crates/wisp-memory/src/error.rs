use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("fact not found: {id}")]
    FactNotFound { id: i64 },

    #[error("commitment not found: {id}")]
    CommitmentNotFound { id: i64 },

    #[error("unknown commitment status: {0}")]
    UnknownStatus(String),

    #[error("embedding length mismatch: {texts} texts, {vectors} vectors")]
    EmbeddingMismatch { texts: usize, vectors: usize },

    #[error("malformed embedding blob ({len} bytes)")]
    MalformedEmbedding { len: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
