//! Default values for the download module (retries, buffers, timeouts, limits).

use std::time::Duration;

/// Default maximum retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default I/O buffer size (16 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default per-request network timeout (30 seconds).
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum file size (16 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 34;

/// Default progress notification granularity (100 KiB).
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100 * 1024;

/// Base delay for the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound on any single backoff delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Header asking the server for a checksum-capable response.
pub const CHECKSUM_REQUEST_HEADER: &str = "X-Require-Checksum";

/// Digest algorithm requested through [`CHECKSUM_REQUEST_HEADER`].
pub const CHECKSUM_ALGORITHM: &str = "sha1";

/// Longest filename most filesystems accept, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Bytes reserved below [`MAX_FILENAME_BYTES`] for temp-file decoration.
pub const FILENAME_SAFETY_MARGIN: usize = 32;

/// Suffix appended to in-flight temp files.
pub const TEMP_FILE_SUFFIX: &str = ".part";
