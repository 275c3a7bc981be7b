//! Outbound chat transport
//!
//! The core only needs three operations from the messaging platform. Inbound
//! events are decoded by the transport crate and fed to the controller.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::{ChatId, MessageId};

/// Messaging operations used by the controller and the workers.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text message and return its id
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId>;

    /// Send the image at `photo` with a caption
    async fn send_photo(&self, chat_id: ChatId, photo: &Path, caption: &str) -> Result<()>;

    /// Replace the text of a previously sent message
    async fn edit_message_text(&self, chat_id: ChatId, message_id: MessageId, text: &str)
        -> Result<()>;
}
