use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel '{channel}' failed to connect: {reason}")]
    Connect { channel: String, reason: String },

    #[error("channel '{channel}' send failed: {reason}")]
    Send { channel: String, reason: String },

    #[error("channel '{channel}' is disconnected")]
    Disconnected { channel: String },

    #[error("attachment rejected: {0}")]
    Attachment(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
