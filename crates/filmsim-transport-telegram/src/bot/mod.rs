/// Inline button payload codec
pub mod callback;
/// Command, photo, callback and payment handlers
pub mod handlers;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// Telegram implementation of the core chat transport
pub mod transport;
/// View layer for UI components (keyboards, messages)
pub mod views;

pub use transport::TelegramChatTransport;
