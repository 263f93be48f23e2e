//! Cross-process run lock.
//!
//! A run snapshots the store once and re-reads nothing, so two overlapping
//! runs could both decide the same fingerprint is novel and double-append.
//! The deployment assumption is "one run at a time"; this advisory file
//! lock enforces it when triggers can overlap.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::run::PipelineError;

/// Exclusive advisory lock held for the duration of one pipeline run.
/// Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        file.try_lock_exclusive()
            .map_err(|_| PipelineError::AlreadyRunning(path.to_path_buf()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
