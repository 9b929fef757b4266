//! Outbound delivery with Telegram's message-length limit handled.

use teloxide::prelude::*;
use tracing::warn;

/// Telegram rejects messages over 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Send `text` to a chat, splitting on line boundaries where a single
/// message would exceed the platform limit.
pub async fn send_response(bot: &Bot, chat_id: ChatId, text: &str) {
    for chunk in split_message(text) {
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            warn!(error = %e, chat = %chat_id, "telegram send failed");
            return;
        }
    }
}

/// Split text into platform-sized chunks, preferring newline boundaries.
pub fn split_message(text: &str) -> Vec<String> {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        if current.chars().count() + line.chars().count() > MAX_MESSAGE_CHARS
            && !current.is_empty()
        {
            chunks.push(std::mem::take(&mut current));
        }
        // A single line longer than the limit is split hard.
        if line.chars().count() > MAX_MESSAGE_CHARS {
            let mut buf = String::new();
            for c in line.chars() {
                buf.push(c);
                if buf.chars().count() >= MAX_MESSAGE_CHARS {
                    chunks.push(std::mem::take(&mut buf));
                }
            }
            current = buf;
            continue;
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
