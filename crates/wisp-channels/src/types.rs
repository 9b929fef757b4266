use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use wisp_core::types::{SenderId, Source};

/// Inline media attached to an inbound message. Lives for one message only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Raw bytes, already downloaded by the channel adapter.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Sanitised filename — path separators and control characters removed
    /// by [`sanitize_filename`] before the attachment is constructed.
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
    Document,
}

/// One message from the outside world, consumed exactly once by the
/// orchestrator.
#[derive(Debug)]
pub struct InboundMessage {
    pub sender_id: SenderId,
    pub source: Source,
    pub text: String,
    /// Text the sender replied to, if the platform exposes it. Untrusted in
    /// the same way `text` is; truncated to 200 chars before injection.
    pub quote: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Present on `http`-sourced messages: the API handler is waiting on
    /// this for the reply (or a structured error).
    pub response_tx: Option<oneshot::Sender<Result<String, String>>>,
}

impl InboundMessage {
    pub fn new(sender_id: impl Into<SenderId>, source: Source, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            source,
            text: text.into(),
            quote: None,
            attachments: Vec::new(),
            response_tx: None,
        }
    }

    /// Fold another message from the same sender into this one (debounce
    /// coalescing). Text lines concatenate; attachments append; the first
    /// response future wins — a coalesced HTTP message keeps its own.
    pub fn coalesce(&mut self, other: InboundMessage) {
        if !other.text.is_empty() {
            if !self.text.is_empty() {
                self.text.push('\n');
            }
            self.text.push_str(&other.text);
        }
        self.attachments.extend(other.attachments);
        if self.response_tx.is_none() {
            self.response_tx = other.response_tx;
        }
        if self.quote.is_none() {
            self.quote = other.quote;
        }
    }
}

/// A reply on its way back out through a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundReply {
    pub recipient: SenderId,
    pub text: String,
    /// Optional attachments produced by tools (e.g. TTS output).
    #[serde(skip)]
    pub attachments: Vec<Attachment>,
    /// Optional emoji reaction for platforms that support it.
    pub reaction: Option<String>,
}

impl OutboundReply {
    pub fn text_to(recipient: SenderId, text: impl Into<String>) -> Self {
        Self {
            recipient,
            text: text.into(),
            attachments: Vec::new(),
            reaction: None,
        }
    }
}

/// Strip path components, parent references, and control characters from a
/// platform-provided filename. Empty results fall back to `"attachment"`.
pub fn sanitize_filename(name: &str) -> String {
    // Keep only the final path component — platforms should not be sending
    // directories, and an embedded "../" must never survive.
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == ':' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(['.', ' ']).to_string();
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}
