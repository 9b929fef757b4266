//! Download Telegram media into inline [`Attachment`]s.

use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::warn;

use wisp_channels::types::{sanitize_filename, Attachment, AttachmentKind};

/// Extract all downloadable media from a message, bounded by `max_bytes`.
/// Oversized or failed downloads are skipped with a warning — the pipeline
/// renders a placeholder for anything that went missing.
pub async fn extract_media(bot: &Bot, msg: &Message, max_bytes: usize) -> Vec<Attachment> {
    // photo — pick highest resolution (last element in the array)
    if let Some(photo) = msg.photo().and_then(|photos| photos.last()) {
        return download_one(bot, &photo.file.id, AttachmentKind::Image, "photo.jpg", max_bytes)
            .await;
    }

    if let Some(doc) = msg.document() {
        let name = doc.file_name.clone().unwrap_or_else(|| "document".to_string());
        return download_one(bot, &doc.file.id, AttachmentKind::Document, &name, max_bytes).await;
    }

    if let Some(voice) = msg.voice() {
        return download_one(bot, &voice.file.id, AttachmentKind::Audio, "voice.ogg", max_bytes)
            .await;
    }

    if let Some(audio) = msg.audio() {
        let name = audio.file_name.clone().unwrap_or_else(|| "audio".to_string());
        return download_one(bot, &audio.file.id, AttachmentKind::Audio, &name, max_bytes).await;
    }

    Vec::new()
}

async fn download_one(
    bot: &Bot,
    file_id: &str,
    kind: AttachmentKind,
    name: &str,
    max_bytes: usize,
) -> Vec<Attachment> {
    let file = match bot.get_file(file_id).await {
        Ok(f) => f,
        Err(e) => {
            warn!(file_id, error = %e, "get_file failed");
            return Vec::new();
        }
    };

    if file.size as usize > max_bytes {
        warn!(
            file_id,
            size = file.size,
            limit = max_bytes,
            "file exceeds size limit, skipping"
        );
        return Vec::new();
    }

    let mut buf: Vec<u8> = Vec::new();
    if let Err(e) = bot.download_file(&file.path, &mut buf).await {
        warn!(file_id, error = %e, "download_file failed");
        return Vec::new();
    }

    vec![Attachment {
        kind,
        bytes: buf,
        filename: sanitize_filename(name),
    }]
}
