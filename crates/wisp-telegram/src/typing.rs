//! Typing indicator kept alive while a turn is processing.

use teloxide::prelude::*;
use teloxide::types::ChatAction;
use tokio::task::JoinHandle;

/// Telegram shows "typing…" for ~5 seconds per action — refresh at 4.
const REFRESH_SECS: u64 = 4;

pub struct TypingHandle {
    task: JoinHandle<()>,
}

impl TypingHandle {
    /// Start the indicator loop. Dropping (or `stop`ping) the handle ends it.
    pub fn start(bot: Bot, chat_id: ChatId) -> Self {
        let task = tokio::spawn(async move {
            loop {
                let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
                tokio::time::sleep(std::time::Duration::from_secs(REFRESH_SECS)).await;
            }
        });
        Self { task }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for TypingHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
