//! Node status line and pid file.

use crate::error::Result;
use std::fs;
use std::path::PathBuf;

/// A single-line text file continuously rewritten with the node's coarse
/// state, so wrapper scripts can watch startup progress without parsing
/// logs. Writes are best-effort.
pub struct StatusLine {
    path: PathBuf,
}

impl StatusLine {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn set(&self, status: &str) {
        if let Err(e) = fs::write(&self.path, format!("{}\n", status)) {
            tracing::warn!(
                "could not update status file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Written at startup when configured, removed again on shutdown.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: PathBuf) -> Result<PidFile> {
        fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(PidFile { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
