#![deny(missing_docs)]
//! FilmSim core library.
//!
//! Transport-agnostic logic for the FilmSim bot: quota and premium storage,
//! the preset catalog, per-user selection sessions, the job queue and the
//! worker pool that runs the LUT transform.

/// Premium plans and payment handling.
pub mod billing;
/// Preset (LUT) catalog.
pub mod catalog;
/// Configuration management.
pub mod config;
/// Chat event orchestration.
pub mod controller;
/// Job queue, transform tool and worker pool.
pub mod jobs;
/// Quota and entitlement storage (SQLite).
pub mod quota;
/// Per-user selection state.
pub mod session;
/// Outbound chat transport abstraction.
pub mod transport;
/// Per-user working directories.
pub mod workdir;

/// Chat participant identifier.
pub type UserId = i64;
/// Chat (reply target) identifier.
pub type ChatId = i64;
/// Identifier of a message inside a chat.
pub type MessageId = i32;
