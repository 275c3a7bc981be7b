//! Per-user working directories
//!
//! Each user gets `<root>/<user_id>/` holding the last upload (`in.jpg`) and
//! the transient transform output (`out.jpg`).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::UserId;

const INPUT_FILE: &str = "in.jpg";
const OUTPUT_FILE: &str = "out.jpg";
const INPUT_NAMES: &[&str] = &["in.jpg", "in.png", "in.jpeg"];
const OUTPUT_NAMES: &[&str] = &["out.jpg", "out.jpeg", "out.png", "tmp.jpg", "tmp.png"];

/// Layout of the per-user working directories
#[derive(Debug, Clone)]
pub struct WorkDirs {
    root: PathBuf,
}

impl WorkDirs {
    /// Create a layout rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory of one user (not created)
    #[must_use]
    pub fn user_dir(&self, user_id: UserId) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    /// Create the user's directory if missing and return it
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn ensure_user_dir(&self, user_id: UserId) -> std::io::Result<PathBuf> {
        let dir = self.user_dir(user_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Where the user's upload is stored
    #[must_use]
    pub fn input_path(&self, user_id: UserId) -> PathBuf {
        self.user_dir(user_id).join(INPUT_FILE)
    }

    /// Where the transform writes its output
    #[must_use]
    pub fn output_path(&self, user_id: UserId) -> PathBuf {
        self.user_dir(user_id).join(OUTPUT_FILE)
    }

    /// Remove stale outputs and temp files of a user
    pub async fn remove_outputs(&self, user_id: UserId) {
        let dir = self.user_dir(user_id);
        for name in OUTPUT_NAMES {
            remove_quietly(&dir.join(name)).await;
        }
    }

    /// Remove the user's uploaded inputs
    pub async fn remove_inputs(&self, user_id: UserId) {
        let dir = self.user_dir(user_id);
        for name in INPUT_NAMES {
            remove_quietly(&dir.join(name)).await;
        }
    }
}

/// Delete a file, ignoring "not found" and logging other failures
pub async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

/// Blocking variant of [`remove_quietly`] for drop guards
pub fn remove_quietly_blocking(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remove_outputs_keeps_input() -> std::io::Result<()> {
        let tmp = tempfile::tempdir()?;
        let dirs = WorkDirs::new(tmp.path());
        let dir = dirs.ensure_user_dir(42).await?;

        tokio::fs::write(dirs.input_path(42), b"in").await?;
        tokio::fs::write(dirs.output_path(42), b"out").await?;
        tokio::fs::write(dir.join("tmp.png"), b"tmp").await?;

        dirs.remove_outputs(42).await;

        assert!(dirs.input_path(42).exists());
        assert!(!dirs.output_path(42).exists());
        assert!(!dir.join("tmp.png").exists());

        dirs.remove_inputs(42).await;
        assert!(!dirs.input_path(42).exists());
        Ok(())
    }
}
