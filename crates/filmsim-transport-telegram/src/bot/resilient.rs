//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! These wrappers retry transient network failures using exponential backoff
//! with jitter. Edits treat "message is not modified" as success.

use anyhow::Result;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardMarkup, InputFile, Message, MessageId};

use crate::utils::retry_telegram_operation;

const ERROR_NOT_MODIFIED: &str = "message is not modified";

/// Send a message, optionally with an inline keyboard, retrying on network
/// failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    markup: Option<InlineKeyboardMarkup>,
) -> Result<Message> {
    let text = text.into();
    retry_telegram_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(kb) = markup.clone() {
            req = req.reply_markup(kb);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Send a local image with a caption, retrying on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_photo_resilient(
    bot: &Bot,
    chat_id: ChatId,
    photo: &Path,
    caption: &str,
) -> Result<Message> {
    retry_telegram_operation(|| async {
        bot.send_photo(chat_id, InputFile::file(photo))
            .caption(caption)
            .await
            .map_err(|e| anyhow::anyhow!("Telegram photo error: {e}"))
    })
    .await
}

/// Edit a message's text (and optionally its keyboard) with retry.
///
/// Returns `Ok(None)` when Telegram reports the message is not modified.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
    markup: Option<InlineKeyboardMarkup>,
) -> Result<Option<Message>> {
    let text = text.into();
    retry_telegram_operation(|| async {
        let mut req = bot.edit_message_text(chat_id, msg_id, text.clone());
        if let Some(kb) = markup.clone() {
            req = req.reply_markup(kb);
        }
        match req.await {
            Ok(msg) => Ok(Some(msg)),
            Err(e) if e.to_string().contains(ERROR_NOT_MODIFIED) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Telegram edit error: {e}")),
        }
    })
    .await
}

/// Replace only the inline keyboard of a message, with retry.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn edit_markup_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    markup: InlineKeyboardMarkup,
) -> Result<()> {
    retry_telegram_operation(|| async {
        match bot
            .edit_message_reply_markup(chat_id, msg_id)
            .reply_markup(markup.clone())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains(ERROR_NOT_MODIFIED) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Telegram edit error: {e}")),
        }
    })
    .await
}
