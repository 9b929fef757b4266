pub mod error;
pub mod log;
pub mod manager;
pub mod types;

pub use error::{Result, SessionError};
pub use manager::{SessionHook, SessionManager, Summarizer};
pub use types::{Event, EventPayload, SessionState, StoredMessage};
