//! Transform jobs
//!
//! A job is created when a user picks an intensity, sits in the bounded
//! [`JobQueue`] and is executed exactly once by a worker of the
//! [`WorkerPool`]. Jobs are never retried.

/// Bounded FIFO with the per-user busy-set
pub mod queue;
/// External LUT transform tool
pub mod tool;
/// Worker pool draining the queue
pub mod worker;

pub use queue::{EnqueueError, JobQueue};
pub use tool::{LutScript, ToolError, TransformTool};
pub use worker::{process_job, WorkerContext, WorkerPool};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::{ChatId, MessageId, UserId};

/// Strength applied by the transform, stored in hundredths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Intensity(u8);

impl Intensity {
    /// All selectable intensities, weakest first
    pub const ALL: [Self; 4] = [Self(25), Self(50), Self(75), Self(100)];

    /// Value in hundredths
    #[must_use]
    pub const fn hundredths(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Rejected intensity value
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unsupported intensity: {0}")]
pub struct InvalidIntensity(pub String);

impl FromStr for Intensity {
    type Err = InvalidIntensity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| InvalidIntensity(s.to_string()))?;
        if !value.is_finite() {
            return Err(InvalidIntensity(s.to_string()));
        }
        let scaled = (value * 100.0).round();
        Self::ALL
            .into_iter()
            .find(|candidate| f64::from(candidate.0) == scaled)
            .ok_or_else(|| InvalidIntensity(s.to_string()))
    }
}

/// A unit of work for the worker pool
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique id used in logs
    pub id: Uuid,
    /// Submitting user
    pub user_id: UserId,
    /// Chat receiving the result
    pub chat_id: ChatId,
    /// "Queued…" status message edited with the outcome
    pub status_message_id: MessageId,
    /// Uploaded photo
    pub input_path: PathBuf,
    /// Preset identifier, resolved again by the worker
    pub preset_id: String,
    /// Chosen intensity
    pub intensity: Intensity,
    /// Where the tool writes its output
    pub output_path: PathBuf,
}

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Output delivered; `usage` is the user's new daily count
    Delivered {
        /// Daily usage after the increment
        usage: u32,
    },
    /// The preset no longer resolves inside the presets root
    NotFound,
    /// The tool exited unsuccessfully (`None` when killed by a signal)
    ToolFailed {
        /// Exit code of the tool
        code: Option<i32>,
    },
    /// The tool exceeded its timeout
    Timeout,
    /// Any other failure
    Failed(String),
}

impl JobOutcome {
    /// Text the status message is edited to
    #[must_use]
    pub fn status_text(&self) -> String {
        match self {
            Self::Delivered { .. } => "Done ✅".to_string(),
            Self::NotFound => "Error: recipe not found.".to_string(),
            Self::ToolFailed { code: Some(code) } => {
                format!("Error: processing failed ({code}).")
            }
            Self::ToolFailed { code: None } => "Error: processing failed (killed).".to_string(),
            Self::Timeout => "Error: processing timed out.".to_string(),
            Self::Failed(detail) => format!("Error: {detail}"),
        }
    }
}
