//! Resumable Download Core Library
//!
//! This library provides a single-file download engine that fetches a remote
//! resource over HTTP(S), persists it with resume-on-failure semantics, and
//! reports progress and completion to a caller-supplied listener.
//!
//! # Architecture
//!
//! Everything lives under [`download`]:
//! - `path_guard` - sandbox and URL validation
//! - `filename` - destination filename resolution and sanitization
//! - `retry` - failure classification and exponential backoff
//! - `writer` - streaming the body into a partial file
//! - `finalize` - promoting the partial file to its target
//! - `engine` - the state machine tying them together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;

// Re-export commonly used types
pub use download::{
    DownloadConfig, DownloadEngine, DownloadError, DownloadListener, DownloadTask, ErrorKind,
    NotificationContext, RateLimiter, RetryPolicy, TaskId,
};
