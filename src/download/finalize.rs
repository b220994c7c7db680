//! Promotes a completed temp file to its target path.

use std::path::Path;

use tokio::fs;
use tracing::{debug, info, instrument, warn};

use super::error::DownloadError;

/// Moves `temp_file` to `target_file`.
///
/// An existing target is replaced (last writer wins). An atomic rename is
/// tried first; when that fails (for example across filesystems) the bytes
/// are copied and the temp file removed. The target is then made readable
/// and writable by everyone.
///
/// Calling this again after a successful promotion is a no-op.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] if neither rename nor copy succeeds, or if
/// the permissions cannot be updated.
#[instrument(skip_all, fields(temp = %temp_file.display(), target = %target_file.display()))]
pub async fn finalize(temp_file: &Path, target_file: &Path) -> Result<(), DownloadError> {
    let temp_exists = fs::try_exists(temp_file)
        .await
        .map_err(|e| DownloadError::io(temp_file, e))?;
    let target_exists = fs::try_exists(target_file)
        .await
        .map_err(|e| DownloadError::io(target_file, e))?;

    if !temp_exists && target_exists {
        debug!("temp file already promoted");
        return Ok(());
    }

    if target_exists {
        fs::remove_file(target_file)
            .await
            .map_err(|e| DownloadError::io(target_file, e))?;
    }

    if let Some(parent) = target_file.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }

    match fs::rename(temp_file, target_file).await {
        Ok(()) => info!("download complete, file promoted"),
        Err(rename_error) => {
            warn!(error = %rename_error, "rename failed, falling back to copy");
            fs::copy(temp_file, target_file)
                .await
                .map_err(|e| DownloadError::io(target_file, e))?;
            fs::remove_file(temp_file)
                .await
                .map_err(|e| DownloadError::io(temp_file, e))?;
            info!("download complete, file promoted by copy");
        }
    }

    make_world_read_write(target_file).await
}

#[cfg(unix)]
async fn make_world_read_write(path: &Path) -> Result<(), DownloadError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o666);
    fs::set_permissions(path, permissions)
        .await
        .map_err(|e| DownloadError::io(path, e))
}

#[cfg(not(unix))]
async fn make_world_read_write(path: &Path) -> Result<(), DownloadError> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut permissions = metadata.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
        .await
        .map_err(|e| DownloadError::io(path, e))
}
