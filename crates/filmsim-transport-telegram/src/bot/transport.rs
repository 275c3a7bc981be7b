use crate::bot::resilient::{edit_message_resilient, send_message_resilient, send_photo_resilient};
use anyhow::Result;
use async_trait::async_trait;
use filmsim_core::transport::ChatTransport;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::MessageId;

/// Telegram implementation of [`ChatTransport`].
#[derive(Clone)]
pub struct TelegramChatTransport {
    bot: Bot,
}

impl TelegramChatTransport {
    /// Wrap a bot handle.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramChatTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i32> {
        let msg = send_message_resilient(&self.bot, ChatId(chat_id), text, None).await?;
        Ok(msg.id.0)
    }

    async fn send_photo(&self, chat_id: i64, photo: &Path, caption: &str) -> Result<()> {
        send_photo_resilient(&self.bot, ChatId(chat_id), photo, caption).await?;
        Ok(())
    }

    async fn edit_message_text(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()> {
        edit_message_resilient(&self.bot, ChatId(chat_id), MessageId(message_id), text, None)
            .await?;
        Ok(())
    }
}
