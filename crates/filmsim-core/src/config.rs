//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the bot's fixed constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Number of buttons per page in the category and filter menus
pub const PAGE_SIZE: usize = 12;
/// Longest button label shown before it gets shortened
pub const LABEL_MAX_CHARS: usize = 44;
/// Default free exports per UTC day
pub const FREE_DAILY_LIMIT: u32 = 5;
/// Default job queue capacity
pub const QUEUE_CAPACITY: usize = 200;
/// Default hard timeout for the transform tool (seconds)
pub const TOOL_TIMEOUT_SECS: u64 = 120;

/// FilmSim settings loaded from environment variables and config files
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilmSimSettings {
    /// Root directory of the `.cube` presets
    #[serde(default = "default_lut_dir")]
    pub filmsim_lut_dir: PathBuf,
    /// Directory holding per-user inputs and outputs
    #[serde(default = "default_work_dir")]
    pub filmsim_work_dir: PathBuf,
    /// External LUT application script
    #[serde(default = "default_script")]
    pub filmsim_script: PathBuf,
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub filmsim_db_path: PathBuf,
    /// Number of workers draining the job queue
    #[serde(default = "default_workers")]
    pub filmsim_workers: usize,
    /// Delete the uploaded photo after each processed job
    #[serde(default)]
    pub filmsim_delete_input: bool,
    /// Free exports per UTC day for non-premium users
    #[serde(default = "default_free_daily_limit")]
    pub filmsim_free_daily_limit: u32,
    /// Job queue capacity
    #[serde(default = "default_queue_capacity")]
    pub filmsim_queue_capacity: usize,
    /// Transform tool timeout in seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub filmsim_tool_timeout_secs: u64,
}

fn default_lut_dir() -> PathBuf {
    PathBuf::from("/home/holly/luts")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_script() -> PathBuf {
    PathBuf::from("apply_lut.sh")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("filmsim.db")
}

const fn default_workers() -> usize {
    1
}

const fn default_free_daily_limit() -> u32 {
    FREE_DAILY_LIMIT
}

const fn default_queue_capacity() -> usize {
    QUEUE_CAPACITY
}

const fn default_tool_timeout_secs() -> u64 {
    TOOL_TIMEOUT_SECS
}

impl Default for FilmSimSettings {
    fn default() -> Self {
        Self {
            filmsim_lut_dir: default_lut_dir(),
            filmsim_work_dir: default_work_dir(),
            filmsim_script: default_script(),
            filmsim_db_path: default_db_path(),
            filmsim_workers: default_workers(),
            filmsim_delete_input: false,
            filmsim_free_daily_limit: default_free_daily_limit(),
            filmsim_queue_capacity: default_queue_capacity(),
            filmsim_tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// Build the layered configuration shared by every crate of the bot.
///
/// Sources, later ones overriding earlier ones: `config/default`,
/// `config/{RUN_MODE}`, `config/local`, `APP__*` variables and finally plain
/// environment variables (empty values are treated as unset).
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // This file shouldn't be checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl FilmSimSettings {
    /// Load settings from config files and the environment
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Worker count, never below one
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.filmsim_workers.max(1)
    }

    /// Queue capacity, never below one
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.filmsim_queue_capacity.max(1)
    }

    /// Transform tool timeout
    #[must_use]
    pub const fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.filmsim_tool_timeout_secs)
    }
}
