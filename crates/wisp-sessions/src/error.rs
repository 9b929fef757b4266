use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {sender}")]
    NotFound { sender: String },

    #[error("snapshot for '{sender}' is corrupt: {reason}")]
    CorruptSnapshot { sender: String, reason: String },

    #[error("summarizer failed: {0}")]
    Summarizer(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
