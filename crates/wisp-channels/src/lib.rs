pub mod channel;
pub mod error;
pub mod types;

pub use channel::Channel;
pub use error::{ChannelError, Result};
pub use types::{Attachment, AttachmentKind, InboundMessage, OutboundReply};
