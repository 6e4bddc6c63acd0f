//! Quarantine store.
//!
//! Quarantining moves a file into the configured directory under its own
//! file name. The directory is created on first use. A file already
//! quarantined under the same name is replaced.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Quarantine errors
#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("File {} not found", .0.display())]
    NotFound(PathBuf),
    #[error("Invalid file path: {}", .0.display())]
    InvalidPath(PathBuf),
    #[error("Failed to quarantine {}: {}", .0.display(), .1)]
    Io(PathBuf, io::Error),
}

/// Moves files into a quarantine directory
#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Quarantine { dir: dir.into() }
    }

    /// Where `path` ends up once quarantined
    pub fn destination(&self, path: &Path) -> Result<PathBuf, QuarantineError> {
        let name = path
            .file_name()
            .ok_or_else(|| QuarantineError::InvalidPath(path.to_path_buf()))?;
        Ok(self.dir.join(name))
    }

    /// Move `path` into the quarantine directory, returning the new location.
    pub async fn quarantine(&self, path: &Path) -> Result<PathBuf, QuarantineError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(QuarantineError::NotFound(path.to_path_buf()));
        }

        let destination = self.destination(path)?;

        if !tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            debug!(dir = %self.dir.display(), "Creating quarantine directory");
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| QuarantineError::Io(path.to_path_buf(), e))?;
        }

        tokio::fs::rename(path, &destination)
            .await
            .map_err(|e| QuarantineError::Io(path.to_path_buf(), e))?;

        info!(
            path = %path.display(),
            destination = %destination.display(),
            "File quarantined"
        );
        Ok(destination)
    }
}
