//! Temp/target path pair for one download.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::download::constants::TEMP_FILE_SUFFIX;
use crate::download::error::DownloadError;
use crate::download::task::TaskId;

/// Path of the partial file for `filename` of task `task_id` inside `work_dir`.
///
/// The name depends only on the URL and the resolved filename, so a later
/// resumed call finds the bytes a crashed one left behind.
#[must_use]
pub fn partial_file_path(work_dir: &Path, task_id: &TaskId, filename: &str) -> PathBuf {
    work_dir.join(format!(
        "{}_{filename}{TEMP_FILE_SUFFIX}",
        task_id.short_hash()
    ))
}

/// Where bytes accumulate and where they end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FilePair {
    temp: PathBuf,
    target: PathBuf,
}

impl FilePair {
    pub(crate) fn new(work_dir: &Path, target_dir: &Path, task_id: &TaskId, filename: &str) -> Self {
        Self {
            temp: partial_file_path(work_dir, task_id, filename),
            target: target_dir.join(filename),
        }
    }

    pub(crate) fn temp(&self) -> &Path {
        &self.temp
    }

    pub(crate) fn target(&self) -> &Path {
        &self.target
    }

    /// Length of the temp file, or `None` if there is none.
    pub(crate) async fn partial_len(&self) -> Result<Option<u64>, DownloadError> {
        match fs::metadata(&self.temp).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DownloadError::io(&self.temp, e)),
        }
    }

    /// Removes the temp file if present.
    pub(crate) async fn discard_temp(&self) -> Result<(), DownloadError> {
        match fs::remove_file(&self.temp).await {
            Ok(()) => {
                debug!(path = %self.temp.display(), "discarded temp file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::io(&self.temp, e)),
        }
    }
}
