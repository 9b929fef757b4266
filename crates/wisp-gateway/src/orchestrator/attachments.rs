//! Attachment processing — turn inbound media into provider-ready content
//! blocks, or textual placeholders when that is not possible.

use base64::Engine;

use wisp_channels::types::{Attachment, AttachmentKind};
use wisp_core::config::DOCUMENT_TEXT_CAP;

/// Images larger than this are not inlined — resizing belongs to a proper
/// image pipeline, and an oversized upload becomes a placeholder instead.
const MAX_INLINE_IMAGE_BYTES: usize = 4 * 1024 * 1024;

/// Compose the user content value: a plain string when there are no
/// attachments, otherwise a content-block array (text first).
pub fn compose_user_content(
    text: &str,
    attachments: &[Attachment],
    supports_vision: bool,
) -> serde_json::Value {
    if attachments.is_empty() {
        return serde_json::json!(text);
    }

    let mut blocks = Vec::new();
    if !text.is_empty() {
        blocks.push(serde_json::json!({"type": "text", "text": text}));
    }
    for attachment in attachments {
        blocks.push(render_attachment(attachment, supports_vision));
    }
    if blocks.is_empty() {
        blocks.push(serde_json::json!({"type": "text", "text": "[empty message]"}));
    }
    serde_json::Value::Array(blocks)
}

/// One attachment → one content block. Anything the provider cannot consume
/// becomes a readable placeholder rather than a dropped byte blob.
fn render_attachment(attachment: &Attachment, supports_vision: bool) -> serde_json::Value {
    match attachment.kind {
        AttachmentKind::Image if supports_vision => {
            if attachment.bytes.len() > MAX_INLINE_IMAGE_BYTES {
                return placeholder(attachment, "image too large to inline");
            }
            serde_json::json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type_for(&attachment.filename),
                    "data": base64::engine::general_purpose::STANDARD.encode(&attachment.bytes),
                }
            })
        }
        AttachmentKind::Image => placeholder(attachment, "model has no vision capability"),
        AttachmentKind::Document => match document_text(attachment) {
            Some(text) => serde_json::json!({
                "type": "text",
                "text": format!("[document: {}]\n{}", attachment.filename, text),
            }),
            None => placeholder(attachment, "not extractable as text"),
        },
        AttachmentKind::Audio => placeholder(attachment, "no transcription configured"),
    }
}

/// Extract document text: UTF-8 only, capped. Binary formats yield `None`.
fn document_text(attachment: &Attachment) -> Option<String> {
    if attachment.bytes.len() > DOCUMENT_TEXT_CAP {
        return None;
    }
    let text = std::str::from_utf8(&attachment.bytes).ok()?;
    Some(text.to_string())
}

fn placeholder(attachment: &Attachment, reason: &str) -> serde_json::Value {
    let kind = match attachment.kind {
        AttachmentKind::Image => "image",
        AttachmentKind::Audio => "audio",
        AttachmentKind::Document => "document",
    };
    serde_json::json!({
        "type": "text",
        "text": format!(
            "[attachment: {} ({kind}, {} bytes) — {reason}]",
            attachment.filename,
            attachment.bytes.len()
        ),
    })
}

fn media_type_for(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}
