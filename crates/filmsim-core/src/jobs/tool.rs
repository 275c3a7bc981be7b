//! External LUT transform tool
//!
//! The transform is an executable invoked as
//! `<script> <input> <preset> <output> <intensity>`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use super::Intensity;

/// Errors reported by a transform run
#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool ran longer than allowed and was killed
    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),
    /// The tool exited unsuccessfully
    #[error("Tool exited with code {code:?}")]
    NonZeroExit {
        /// Exit code, `None` when terminated by a signal
        code: Option<i32>,
    },
    /// The tool could not be started
    #[error("Failed to start tool: {0}")]
    Spawn(#[source] std::io::Error),
    /// Waiting on the tool failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Applies a preset to an image
#[async_trait]
pub trait TransformTool: Send + Sync {
    /// Transform `input` with `preset` at `intensity`, writing `output`.
    async fn apply(
        &self,
        input: &Path,
        preset: &Path,
        output: &Path,
        intensity: Intensity,
    ) -> Result<(), ToolError>;
}

/// Shell script transform with a hard timeout
#[derive(Debug, Clone)]
pub struct LutScript {
    script: PathBuf,
    timeout: Duration,
}

impl LutScript {
    /// Create a runner for `script`
    #[must_use]
    pub fn new(script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TransformTool for LutScript {
    async fn apply(
        &self,
        input: &Path,
        preset: &Path,
        output: &Path,
        intensity: Intensity,
    ) -> Result<(), ToolError> {
        let mut child = Command::new(&self.script)
            .arg(input)
            .arg(preset)
            .arg(output)
            .arg(intensity.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(ToolError::Spawn)?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out tool");
                }
                return Err(ToolError::Timeout(self.timeout));
            }
        };

        debug!(status = %status, "Tool finished");
        if status.success() {
            Ok(())
        } else {
            Err(ToolError::NonZeroExit {
                code: status.code(),
            })
        }
    }
}
