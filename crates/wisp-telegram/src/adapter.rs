//! Telegram channel adapter — receives updates via long polling and pushes
//! [`InboundMessage`]s into the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wisp_channels::error::ChannelError;
use wisp_channels::types::{InboundMessage, OutboundReply};
use wisp_channels::Channel;
use wisp_core::config::TelegramConfig;
use wisp_core::types::Source;

use crate::allow;
use crate::attach;

pub struct TelegramChannel {
    bot: Bot,
    config: Arc<TelegramConfig>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            bot: Bot::new(config.bot_token.clone()),
            config: Arc::new(config),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn run(
        &self,
        inbound: mpsc::Sender<InboundMessage>,
        shutdown: CancellationToken,
    ) -> Result<(), ChannelError> {
        info!("telegram adapter starting (long polling)");

        let handler = Update::filter_message().endpoint(handle_message);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![inbound, Arc::clone(&self.config)])
            .default_handler(|_| async {})
            .build();

        let token = dispatcher.shutdown_token();
        let watcher = tokio::spawn(async move {
            shutdown.cancelled().await;
            if let Ok(done) = token.shutdown() {
                done.await;
            }
        });

        dispatcher.dispatch().await;
        watcher.abort();
        info!("telegram adapter stopped");
        Ok(())
    }

    async fn send(&self, reply: &OutboundReply) -> Result<(), ChannelError> {
        let chat_id: i64 = reply.recipient.as_str().parse().map_err(|_| {
            ChannelError::Send {
                channel: "telegram".to_string(),
                reason: format!("recipient '{}' is not a chat id", reply.recipient),
            }
        })?;
        crate::send::send_response(&self.bot, ChatId(chat_id), &reply.text).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        // Long polling holds no persistent connection to tear down; the
        // dispatcher's shutdown token (see `run`) does the real work.
        Ok(())
    }
}

/// Per-update handler registered in the Dispatcher.
///
/// Guard order: bot filter → allow-list → empty check, then the update is
/// converted and queued. A full orchestrator buffer drops the message here —
/// Telegram will not be asked to back off, the user simply gets no reply.
async fn handle_message(
    bot: Bot,
    msg: Message,
    inbound: mpsc::Sender<InboundMessage>,
    config: Arc<TelegramConfig>,
) -> ResponseResult<()> {
    // Ignore messages from other bots.
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let username = from.username.as_deref().unwrap_or("");
    let user_id = from.id.0.to_string();
    if !allow::is_allowed(&config.allow_users, username, &user_id) {
        return Ok(());
    }

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    let attachments = attach::extract_media(&bot, &msg, config.max_attachment_bytes).await;
    if text.is_empty() && attachments.is_empty() {
        return Ok(());
    }

    // The quoted original, when the user replied to an earlier message.
    let quote = msg
        .reply_to_message()
        .and_then(|replied| replied.text().or(replied.caption()))
        .map(String::from);

    let mut message = InboundMessage::new(
        msg.chat.id.0.to_string(),
        Source::Telegram,
        text,
    );
    message.quote = quote;
    message.attachments = attachments;

    if let Err(e) = inbound.try_send(message) {
        warn!(error = %e, chat = %msg.chat.id, "orchestrator inbound queue rejected message");
    }
    Ok(())
}
