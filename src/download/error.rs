//! Error types for the download module.
//!
//! This module defines structured errors for all download operations,
//! providing context-rich error messages for debugging and observer delivery.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed transport-level cause (reqwest error, scripted test failure, ...).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a [`DownloadError`].
///
/// Used by the retry policy and as the diagnostic tag carried by
/// translated [`DownloadError::IoFailure`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    SecurityViolation,
    HttpStatus,
    RangeNotSatisfiable,
    FilenameChanged,
    FileTooLarge,
    RetryExhausted,
    Timeout,
    ConnectionRefused,
    TlsHandshake,
    Network,
    Io,
    IoFailure,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInput => "InvalidInput",
            Self::SecurityViolation => "SecurityViolation",
            Self::HttpStatus => "HttpStatus",
            Self::RangeNotSatisfiable => "RangeNotSatisfiable",
            Self::FilenameChanged => "FilenameChanged",
            Self::FileTooLarge => "FileTooLarge",
            Self::RetryExhausted => "RetryExhausted",
            Self::Timeout => "Timeout",
            Self::ConnectionRefused => "ConnectionRefused",
            Self::TlsHandshake => "TlsHandshake",
            Self::Network => "Network",
            Self::Io => "Io",
            Self::IoFailure => "IoFailure",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Malformed URL, unsupported scheme, or bad path syntax.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// What was wrong with the input.
        reason: String,
    },

    /// Path traversal or an escape from the sandbox root.
    #[error("security violation: {reason}")]
    SecurityViolation {
        /// What was rejected and why.
        reason: String,
    },

    /// Non-2xx response other than 416.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server answered a ranged request with 416; the resume point is stale.
    #[error("requested range not satisfiable for {url} (offset {offset})")]
    RangeNotSatisfiable {
        /// The URL that rejected the range.
        url: String,
        /// The offset that was requested.
        offset: u64,
    },

    /// The server-declared filename changed between probe and resume.
    #[error("filename changed during download: {original} -> {current}")]
    FilenameChanged {
        /// Name captured on the initial probe.
        original: String,
        /// Name declared by the resumed response.
        current: String,
    },

    /// The partial file or declared content exceeds the configured maximum.
    #[error("file size {size} exceeds limit of {limit} bytes")]
    FileTooLarge {
        /// Observed or declared size in bytes.
        size: u64,
        /// Configured `max_file_size`.
        limit: u64,
    },

    /// Every permitted attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Total attempts made (initial try included).
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: Box<DownloadError>,
    },

    /// A single request or body read exceeded `network_timeout`.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// TCP connection could not be established.
    #[error("connection refused for {url}: {source}")]
    ConnectionRefused {
        /// The URL being fetched.
        url: String,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// TLS negotiation failed.
    #[error("TLS handshake failed for {url}: {source}")]
    TlsHandshake {
        /// The URL being fetched.
        url: String,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// Any other transport failure (reset, broken body stream, ...).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// File system error (create, write, rename, permissions).
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Translated error delivered to observers.
    ///
    /// Carries the originating kind (and HTTP status when there was one)
    /// rather than the original value, which is still returned to the caller.
    #[error("I/O failure ({kind}): {detail}")]
    IoFailure {
        /// Kind of the originating error.
        kind: ErrorKind,
        /// HTTP status for translated HTTP failures.
        status: Option<u16>,
        /// Display text of the originating error.
        detail: String,
    },

    /// The caller cancelled the download.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates an invalid-input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Creates a security-violation error.
    pub fn security(reason: impl Into<String>) -> Self {
        Self::SecurityViolation {
            reason: reason.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a 416 range error.
    pub fn range_not_satisfiable(url: impl Into<String>, offset: u64) -> Self {
        Self::RangeNotSatisfiable {
            url: url.into(),
            offset,
        }
    }

    /// Creates a filename consistency error.
    pub fn filename_changed(original: impl Into<String>, current: impl Into<String>) -> Self {
        Self::FilenameChanged {
            original: original.into(),
            current: current.into(),
        }
    }

    /// Creates a size-limit error.
    pub fn file_too_large(size: u64, limit: u64) -> Self {
        Self::FileTooLarge { size, limit }
    }

    /// Wraps the last attempt's error after the retry budget is spent.
    pub fn retry_exhausted(attempts: u32, last: DownloadError) -> Self {
        Self::RetryExhausted {
            attempts,
            last: Box::new(last),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a connection-refused error.
    pub fn connection_refused(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ConnectionRefused {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Creates a TLS handshake error.
    pub fn tls_handshake(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::TlsHandshake {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Creates a generic network error.
    pub fn network(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Network {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the classification tag of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::SecurityViolation { .. } => ErrorKind::SecurityViolation,
            Self::HttpStatus { .. } => ErrorKind::HttpStatus,
            Self::RangeNotSatisfiable { .. } => ErrorKind::RangeNotSatisfiable,
            Self::FilenameChanged { .. } => ErrorKind::FilenameChanged,
            Self::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ConnectionRefused { .. } => ErrorKind::ConnectionRefused,
            Self::TlsHandshake { .. } => ErrorKind::TlsHandshake,
            Self::Network { .. } => ErrorKind::Network,
            Self::Io { .. } => ErrorKind::Io,
            Self::IoFailure { .. } => ErrorKind::IoFailure,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Translates this error into the form delivered to observers.
    ///
    /// Security violations pass through unchanged. HTTP failures become an
    /// [`IoFailure`](Self::IoFailure) carrying the status; everything else
    /// becomes an `IoFailure` tagged with the originating kind.
    #[must_use]
    pub fn for_observer(&self) -> DownloadError {
        match self {
            Self::SecurityViolation { reason } => Self::security(reason.clone()),
            Self::HttpStatus { status, .. } => Self::IoFailure {
                kind: ErrorKind::HttpStatus,
                status: Some(*status),
                detail: format!("network error: {self}"),
            },
            Self::IoFailure {
                kind,
                status,
                detail,
            } => Self::IoFailure {
                kind: *kind,
                status: *status,
                detail: detail.clone(),
            },
            other => Self::IoFailure {
                kind: other.kind(),
                status: other.http_status_code(),
                detail: other.to_string(),
            },
        }
    }

    /// HTTP status behind this error, looking through `RetryExhausted`.
    #[must_use]
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::IoFailure { status, .. } => *status,
            Self::RetryExhausted { last, .. } => last.http_status_code(),
            _ => None,
        }
    }
}

// No blanket `From<std::io::Error>` / `From<reqwest::Error>`: every variant
// needs a path or URL the source error does not carry.
