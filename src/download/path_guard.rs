//! Sandbox enforcement for save paths and scheme checks for URLs.
//!
//! Every save path is resolved against a sandbox root before any file is
//! created. Relative paths are joined onto the root; absolute paths must
//! already live under it. The result is normalized lexically, symlinks in the
//! existing prefix are resolved, and the final path must still sit under the
//! root's canonical form.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, instrument};
use url::Url;

use super::error::DownloadError;

/// Validates `path` against `sandbox_root` and returns its canonical form.
///
/// An empty path resolves to the sandbox root itself. The sandbox root must
/// exist.
///
/// # Errors
///
/// - [`DownloadError::InvalidInput`] if the path contains NUL bytes or the
///   sandbox root cannot be canonicalized.
/// - [`DownloadError::SecurityViolation`] if the path is absolute and outside
///   the sandbox, contains a parent-traversal segment after normalization, or
///   resolves (through symlinks) outside the sandbox.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn validate_path(
    path: impl AsRef<Path>,
    sandbox_root: impl AsRef<Path>,
) -> Result<PathBuf, DownloadError> {
    let path = path.as_ref();
    let sandbox_root = sandbox_root.as_ref();

    if path.as_os_str().as_encoded_bytes().contains(&0) {
        return Err(DownloadError::invalid_input("path contains a NUL byte"));
    }

    let root = sandbox_root.canonicalize().map_err(|e| {
        DownloadError::invalid_input(format!(
            "sandbox root {} is not accessible: {e}",
            sandbox_root.display()
        ))
    })?;

    if path.as_os_str().is_empty() {
        return Ok(root);
    }

    let candidate = if path.is_absolute() {
        if !path.starts_with(&root) && !path.starts_with(sandbox_root) {
            return Err(DownloadError::security(format!(
                "absolute path {} is outside the sandbox {}",
                path.display(),
                root.display()
            )));
        }
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let normalized = normalize_lexically(&candidate);
    if normalized
        .components()
        .any(|component| component == Component::ParentDir)
    {
        return Err(DownloadError::security(format!(
            "path traversal detected in {}",
            path.display()
        )));
    }

    let resolved = resolve_existing_prefix(&normalized);
    if !resolved.starts_with(&root) {
        return Err(DownloadError::security(format!(
            "path {} escapes the sandbox {}",
            path.display(),
            root.display()
        )));
    }

    debug!(resolved = %resolved.display(), "path accepted");
    Ok(resolved)
}

/// Validates URL syntax and, when `force_https` is set, its scheme.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidInput`] if the URL does not parse, is not
/// an `http`/`https` URL with a host, or is not `https` while HTTPS is
/// required.
pub fn validate_url(url: &str, force_https: bool) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url)
        .map_err(|e| DownloadError::invalid_input(format!("invalid URL format {url}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(DownloadError::invalid_input(format!(
            "unsupported URL {url}: expected http(s) with a host"
        )));
    }

    if force_https && parsed.scheme() != "https" {
        return Err(DownloadError::invalid_input(format!(
            "HTTPS required but got {url}"
        )));
    }

    Ok(parsed)
}

/// Collapses `.` and `..` without touching the filesystem.
///
/// A `..` that would climb above the root is kept so the caller can reject it.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Canonicalizes the deepest existing ancestor and re-appends the rest.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut resolved = canonical;
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    #[test]
    fn test_validate_path_relative_stays_under_root() {
        let (_dir, root) = sandbox();
        let resolved = validate_path("sub/file.txt", &root).unwrap();
        assert!(resolved.starts_with(&root));
        assert!(resolved.ends_with("sub/file.txt"));
    }

    #[test]
    fn test_validate_path_rejects_parent_escape() {
        let (_dir, root) = sandbox();
        let result = validate_path("../outside", &root);
        assert!(matches!(result, Err(DownloadError::SecurityViolation { .. })));
    }

    #[test]
    fn test_validate_path_rejects_nested_escape() {
        let (_dir, root) = sandbox();
        let result = validate_path("a/b/../../../etc/passwd", &root);
        assert!(matches!(result, Err(DownloadError::SecurityViolation { .. })));
    }

    #[test]
    fn test_validate_path_allows_inner_parent_segments() {
        let (_dir, root) = sandbox();
        let resolved = validate_path("a/../b", &root).unwrap();
        assert_eq!(resolved, root.join("b"));
    }

    #[test]
    fn test_validate_path_rejects_absolute_outside_root() {
        let (_dir, root) = sandbox();
        let other = TempDir::new().unwrap();
        let result = validate_path(other.path(), &root);
        assert!(matches!(result, Err(DownloadError::SecurityViolation { .. })));
    }

    #[test]
    fn test_validate_path_accepts_absolute_inside_root() {
        let (_dir, root) = sandbox();
        let inside = root.join("nested");
        let resolved = validate_path(&inside, &root).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn test_validate_path_empty_is_root() {
        let (_dir, root) = sandbox();
        assert_eq!(validate_path("", &root).unwrap(), root);
    }

    #[test]
    fn test_validate_path_missing_root_is_invalid_input() {
        let (dir, _root) = sandbox();
        let missing = dir.path().join("does-not-exist");
        let result = validate_path("file", &missing);
        assert!(matches!(result, Err(DownloadError::InvalidInput { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_path_rejects_symlink_escape() {
        let (_dir, root) = sandbox();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        let result = validate_path("link/file.txt", &root);
        assert!(matches!(result, Err(DownloadError::SecurityViolation { .. })));
    }

    #[test]
    fn test_validate_url_accepts_https() {
        let url = validate_url("https://example.com/file.bin", true).unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn test_validate_url_rejects_http_when_forced() {
        let result = validate_url("http://example.com/file.bin", true);
        assert!(matches!(result, Err(DownloadError::InvalidInput { .. })));
        assert!(validate_url("http://example.com/file.bin", false).is_ok());
    }

    #[test]
    fn test_validate_url_rejects_malformed() {
        for url in ["not a url", "", "ftp://example.com/x", "https://"] {
            assert!(
                matches!(validate_url(url, false), Err(DownloadError::InvalidInput { .. })),
                "{url} should be rejected"
            );
        }
    }
}
