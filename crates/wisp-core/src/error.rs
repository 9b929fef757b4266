use thiserror::Error;

#[derive(Debug, Error)]
pub enum WispError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Unknown provider: {name}")]
    UnknownProvider { name: String },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Backpressure: per-sender buffer full for {sender}")]
    Backpressure { sender: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WispError {
    /// Short error code string exposed on the control API.
    pub fn code(&self) -> &'static str {
        match self {
            WispError::Config(_) => "CONFIG_ERROR",
            WispError::AuthFailed(_) => "AUTH_FAILED",
            WispError::UnknownProvider { .. } => "UNKNOWN_PROVIDER",
            WispError::Session(_) => "SESSION_ERROR",
            WispError::Memory(_) => "MEMORY_ERROR",
            WispError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            WispError::Channel { .. } => "CHANNEL_ERROR",
            WispError::Backpressure { .. } => "BACKPRESSURE",
            WispError::Serialization(_) => "SERIALIZATION_ERROR",
            WispError::Io(_) => "IO_ERROR",
            WispError::Timeout { .. } => "TIMEOUT",
            WispError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, WispError>;
