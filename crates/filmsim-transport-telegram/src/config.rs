//! Telegram transport settings.

use config::ConfigError;
use filmsim_core::config::FilmSimSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum retries for a Telegram API call.
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial retry backoff in milliseconds.
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound of the retry backoff in milliseconds.
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 5000;

/// Telegram transport settings loaded from environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramSettings {
    /// Telegram Bot API token.
    pub telegram_token: String,
}

impl TelegramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        filmsim_core::config::build_config()?.try_deserialize()
    }
}

/// Combined settings used by the Telegram transport layer.
#[derive(Clone)]
pub struct BotSettings {
    /// Core settings shared across transport handlers.
    pub filmsim: Arc<FilmSimSettings>,
    /// Telegram-specific settings.
    pub telegram: Arc<TelegramSettings>,
}

impl BotSettings {
    /// Create a new combined settings bundle.
    #[must_use]
    pub fn new(filmsim: FilmSimSettings, telegram: TelegramSettings) -> Self {
        Self {
            filmsim: Arc::new(filmsim),
            telegram: Arc::new(telegram),
        }
    }
}
