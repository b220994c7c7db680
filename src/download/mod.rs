//! Resumable HTTP(S) download engine.
//!
//! This module downloads one remote file per call into a sandboxed directory,
//! resuming from a partial file when asked to and retrying transient failures
//! with exponential backoff.
//!
//! # Features
//!
//! - Streaming downloads through a fixed-size buffer
//! - Resume via `Range` requests, with a guard against servers that ignore them
//! - Filename from `Content-Disposition`, the URL path, or a generated fallback,
//!   always sanitized
//! - Sandbox enforcement for save paths (traversal and symlink escapes)
//! - Optional shared byte-rate limiter
//! - Progress and completion callbacks, inline or on a separate task
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use resume_core::download::{DownloadConfig, DownloadEngine, RateLimiter};
//! # use resume_core::download::{DownloadError, DownloadListener, TaskId};
//! # struct Quiet;
//! # impl DownloadListener for Quiet {
//! #     fn on_progress(&self, _: &TaskId, _: f32, _: u64, _: u64) {}
//! #     fn on_success(&self, _: &TaskId, _: &std::path::Path) {}
//! #     fn on_error(&self, _: &TaskId, _: &DownloadError) {}
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(
//!     DownloadConfig::for_sandbox("./downloads")
//!         .with_speed_limiter(Arc::new(RateLimiter::new(512 * 1024))),
//! );
//! let engine = DownloadEngine::new(config)?;
//! let file_path = engine
//!     .execute("https://example.com/paper.pdf", "papers", Arc::new(Quiet), true)
//!     .await?;
//! println!("Downloaded: {}", file_path.display());
//! # Ok(())
//! # }
//! ```

mod config;
pub mod constants;
mod engine;
mod error;
mod filename;
mod finalize;
mod listener;
mod path_guard;
pub mod rate_limiter;
mod retry;
mod task;
mod transport;
mod writer;

pub use config::{DownloadConfig, NotificationContext};
pub use engine::{DownloadEngine, partial_file_path};
pub use error::{BoxError, DownloadError, ErrorKind};
pub use filename::{
    FilenameSource, ResolvedFilename, resolve_filename, sanitize_filename,
    verify_filename_consistency,
};
pub use finalize::finalize;
pub use listener::DownloadListener;
pub use path_guard::{validate_path, validate_url};
pub use rate_limiter::{RateLimiter, SpeedLimiter};
pub use retry::{RetryDecision, RetryPolicy, backoff_delay, is_retryable};
pub use task::{DownloadTask, FAILED_PROGRESS, TaskId};
pub use transport::{
    BodyStream, FetchRequest, FetchResponse, HttpTransport, ReqwestTransport, default_user_agent,
};
