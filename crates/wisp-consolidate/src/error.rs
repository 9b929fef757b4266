use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsolidateError {
    #[error("extraction call failed: {0}")]
    Provider(#[from] wisp_agent::ProviderError),

    #[error("extraction response was not parseable: {0}")]
    Parse(String),

    #[error("memory store error: {0}")]
    Memory(#[from] wisp_memory::MemoryError),

    #[error("session log error: {0}")]
    Sessions(#[from] wisp_sessions::SessionError),

    #[error("embedding batch failed: {0}")]
    Embedding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConsolidateError>;
