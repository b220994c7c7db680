//! Download engine: one resumable transfer per call, serialized per instance.
//!
//! # Overview
//!
//! [`DownloadEngine::execute`] validates the request, probes the server for a
//! filename, then loops over transfer attempts. An attempt resumes from the
//! partial file when asked to, streams the body into it, and on a transient
//! failure waits out the backoff, discards the partial file and starts over,
//! until the retry budget is spent. A finished partial file is promoted to its
//! target and only then reported as a success.
//!
//! Each call holds the engine's lock until its terminal callback has been
//! delivered, so calls on one instance never interleave. For parallel
//! downloads, create several engines that share one `Arc<DownloadConfig>`.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use resume_core::download::{
//!     DownloadConfig, DownloadEngine, DownloadError, DownloadListener, TaskId,
//! };
//!
//! struct Printer;
//!
//! impl DownloadListener for Printer {
//!     fn on_progress(&self, _id: &TaskId, fraction: f32, _done: u64, _total: u64) {
//!         println!("{:.0}%", fraction * 100.0);
//!     }
//!
//!     fn on_success(&self, _id: &TaskId, file: &Path) {
//!         println!("saved {}", file.display());
//!     }
//!
//!     fn on_error(&self, _id: &TaskId, error: &DownloadError) {
//!         eprintln!("failed: {error}");
//!     }
//! }
//!
//! # async fn example() -> Result<(), DownloadError> {
//! let config = Arc::new(DownloadConfig::for_sandbox("/srv/downloads"));
//! let engine = DownloadEngine::new(config)?;
//! let file = engine
//!     .execute("https://example.com/archive.tar", "archives", Arc::new(Printer), true)
//!     .await?;
//! println!("{}", file.display());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, HeaderName, HeaderValue, RANGE};
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::config::DownloadConfig;
use super::constants::{CHECKSUM_ALGORITHM, CHECKSUM_REQUEST_HEADER};
use super::error::DownloadError;
use super::filename::{ResolvedFilename, resolve_filename, verify_filename_consistency};
use super::finalize::finalize;
use super::listener::{DownloadListener, Notifier};
use super::path_guard::{validate_path, validate_url};
use super::retry::{RetryDecision, is_retryable};
use super::task::TaskId;
use super::transport::{FetchRequest, FetchResponse, HttpTransport, ReqwestTransport};
use super::writer::write_body;

mod file_pair;

use file_pair::FilePair;
pub use file_pair::partial_file_path;

/// Where one `execute` call is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadState {
    Idle,
    Validating,
    Probing,
    Resuming,
    Transferring,
    Finalizing,
    Succeeded,
    Failed,
}

/// Result of one transfer attempt, tagged for the retry loop.
#[derive(Debug)]
enum AttemptOutcome {
    Completed(u64),
    Retryable(DownloadError),
    Fatal(DownloadError),
}

impl From<Result<u64, DownloadError>> for AttemptOutcome {
    fn from(result: Result<u64, DownloadError>) -> Self {
        match result {
            Ok(bytes) => Self::Completed(bytes),
            Err(error) if is_retryable(&error) => Self::Retryable(error),
            Err(error) => Self::Fatal(error),
        }
    }
}

/// Resumable single-file downloader.
///
/// # Concurrency Model
///
/// - `execute` runs to completion before returning; network and disk I/O are
///   suspension points
/// - An async mutex serializes calls on one instance for their full duration,
///   retries included
/// - The lock guard is dropped on every exit path, including when the caller
///   drops the future or cancels the token
///
/// # Retry Behavior
///
/// - Timeouts, refused connections, TLS handshake failures and 5xx responses
///   are retried with exponential backoff, up to `max_retries` times
/// - Every retry starts from an empty partial file
/// - Running out of retries yields [`DownloadError::RetryExhausted`]
pub struct DownloadEngine {
    config: Arc<DownloadConfig>,
    transport: Arc<dyn HttpTransport>,
    lock: Mutex<()>,
}

impl fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine with a `reqwest` transport configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidInput`] if the HTTP client cannot be
    /// built.
    pub fn new(config: Arc<DownloadConfig>) -> Result<Self, DownloadError> {
        let transport =
            ReqwestTransport::with_settings(config.network_timeout(), config.user_agent())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates an engine that issues requests through `transport`.
    #[must_use]
    pub fn with_transport(config: Arc<DownloadConfig>, transport: Arc<dyn HttpTransport>) -> Self {
        debug!(
            max_retries = config.max_retries(),
            force_https = config.force_https(),
            sandbox = %config.allowed_base_path().display(),
            "creating download engine"
        );
        Self {
            config,
            transport,
            lock: Mutex::new(()),
        }
    }

    /// Returns the shared configuration.
    #[must_use]
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Downloads `url` into the directory `save_path` inside the sandbox.
    ///
    /// `save_path` is relative to the sandbox root (or an absolute path inside
    /// it); the file name comes from the server. With `enable_resume`, bytes
    /// left in the partial file by an earlier call for the same URL are kept
    /// and only the rest is requested.
    ///
    /// `listener` receives progress and exactly one terminal callback, which
    /// is delivered before this method returns.
    ///
    /// # Errors
    ///
    /// Every failure is also reported to `listener`:
    /// - [`DownloadError::InvalidInput`] or [`DownloadError::SecurityViolation`]
    ///   if the URL or save path is rejected
    /// - [`DownloadError::HttpStatus`] for a non-retryable status
    /// - [`DownloadError::RangeNotSatisfiable`] if the resume point is stale
    /// - [`DownloadError::FilenameChanged`] if a resumed response names a
    ///   different file
    /// - [`DownloadError::FileTooLarge`] if the file exceeds `max_file_size`
    /// - [`DownloadError::RetryExhausted`] once transient failures use up the
    ///   retry budget
    /// - [`DownloadError::Io`] for local filesystem failures
    pub async fn execute(
        &self,
        url: &str,
        save_path: impl AsRef<Path>,
        listener: Arc<dyn DownloadListener>,
        enable_resume: bool,
    ) -> Result<PathBuf, DownloadError> {
        self.execute_with_cancellation(
            url,
            save_path,
            listener,
            enable_resume,
            &CancellationToken::new(),
        )
        .await
    }

    /// Like [`execute`](Self::execute), but stops at the next suspension
    /// point once `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute), plus [`DownloadError::Cancelled`] when
    /// cancelled. Cancellation is reported to `listener` like any other
    /// failure, and the partial file is kept for a later resume.
    #[instrument(
        skip(self, save_path, listener, cancel),
        fields(save_path = %save_path.as_ref().display())
    )]
    pub async fn execute_with_cancellation(
        &self,
        url: &str,
        save_path: impl AsRef<Path>,
        listener: Arc<dyn DownloadListener>,
        enable_resume: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        let notifier = Notifier::new(
            TaskId::from_url(url),
            listener,
            self.config.notification_context(),
        );

        let _guard = tokio::select! {
            () = cancel.cancelled() => {
                notifier.error(DownloadError::Cancelled.for_observer()).await;
                return Err(DownloadError::Cancelled);
            }
            guard = self.lock.lock() => guard,
        };

        let mut session = Session {
            engine: self,
            notifier: &notifier,
            cancel,
            state: DownloadState::Idle,
        };
        let result = session.run(url, save_path.as_ref(), enable_resume).await;

        match result {
            Ok(target) => {
                session.enter(DownloadState::Succeeded);
                info!(task_id = %notifier.task_id(), path = %target.display(), "download succeeded");
                notifier.success(&target).await;
                Ok(target)
            }
            Err(error) => {
                session.enter(DownloadState::Failed);
                warn!(task_id = %notifier.task_id(), kind = %error.kind(), error = %error, "download failed");
                notifier.error(error.for_observer()).await;
                Err(error)
            }
        }
    }
}

/// State of one `execute` call while it holds the engine lock.
struct Session<'a> {
    engine: &'a DownloadEngine,
    notifier: &'a Notifier,
    cancel: &'a CancellationToken,
    state: DownloadState,
}

impl Session<'_> {
    fn enter(&mut self, next: DownloadState) {
        debug!(
            task_id = %self.notifier.task_id(),
            from = ?self.state,
            to = ?next,
            "state transition"
        );
        self.state = next;
    }

    async fn run(
        &mut self,
        url: &str,
        save_path: &Path,
        enable_resume: bool,
    ) -> Result<PathBuf, DownloadError> {
        let engine = self.engine;
        let config = engine.config.as_ref();

        self.enter(DownloadState::Validating);
        let (url, target_dir) = validate(config, url, save_path).await?;

        self.enter(DownloadState::Probing);
        let probe = self.fetch(&url, 0).await?;
        if !probe.is_success() {
            // 5xx is left to the retry loop; any other status ends here
            if !(500..=599).contains(&probe.status) {
                return Err(DownloadError::http_status(url.as_str(), probe.status));
            }
            warn!(status = probe.status, "probe got server error, deferring to transfer");
        }
        let mut filename = resolve_filename(&probe);
        drop(probe);
        info!(filename = %filename.name, source = ?filename.source, "resolved filename");

        let task_id = self.notifier.task_id().clone();
        let mut pair = FilePair::new(config.work_dir(), &target_dir, &task_id, &filename.name);
        let policy = config.retry_policy();
        let mut retries_used = 0u32;

        let written = loop {
            self.enter(DownloadState::Resuming);
            let result = self
                .attempt(&url, &pair, &mut filename, enable_resume)
                .await;

            match AttemptOutcome::from(result) {
                AttemptOutcome::Completed(bytes) => break bytes,
                AttemptOutcome::Fatal(error) => return Err(error),
                AttemptOutcome::Retryable(error) => match policy.should_retry(&error, retries_used)
                {
                    RetryDecision::Retry { delay, attempt } => {
                        warn!(
                            attempt,
                            max_retries = policy.max_retries(),
                            delay_ms = delay.as_millis(),
                            error = %error,
                            "retrying download"
                        );
                        self.backoff(delay).await?;
                        pair.discard_temp().await?;
                        pair = FilePair::new(config.work_dir(), &target_dir, &task_id, &filename.name);
                        retries_used = attempt;
                    }
                    RetryDecision::DoNotRetry { exhausted: true } => {
                        return Err(DownloadError::retry_exhausted(retries_used + 1, error));
                    }
                    RetryDecision::DoNotRetry { exhausted: false } => return Err(error),
                },
            }
        };

        self.enter(DownloadState::Finalizing);
        finalize(pair.temp(), pair.target()).await?;
        debug!(bytes = written, retries_used, "transfer finalized");
        Ok(pair.target().to_path_buf())
    }

    /// One pass through `Resuming` and `Transferring`.
    async fn attempt(
        &mut self,
        url: &Url,
        pair: &FilePair,
        filename: &mut ResolvedFilename,
        enable_resume: bool,
    ) -> Result<u64, DownloadError> {
        let engine = self.engine;
        let config = engine.config.as_ref();

        let mut offset = if enable_resume {
            pair.partial_len().await?.unwrap_or(0)
        } else {
            pair.discard_temp().await?;
            0
        };
        if offset > config.max_file_size() {
            return Err(DownloadError::file_too_large(offset, config.max_file_size()));
        }
        if offset > 0 {
            info!(offset, "resuming from partial file");
        }

        let response = self.fetch(url, offset).await?;
        match response.status {
            416 => {
                pair.discard_temp().await?;
                return Err(DownloadError::range_not_satisfiable(url.as_str(), offset));
            }
            status if !response.is_success() => {
                return Err(DownloadError::http_status(url.as_str(), status));
            }
            206 if offset > 0 => {
                *filename = verify_filename_consistency(filename, &response)?;
            }
            status if offset > 0 => {
                warn!(offset, status, "server ignored range request, restarting from zero");
                offset = 0;
            }
            _ => {}
        }

        self.enter(DownloadState::Transferring);
        write_body(
            response,
            pair.temp(),
            offset,
            self.notifier,
            config,
            self.cancel,
        )
        .await
    }

    /// Issues a ranged GET bounded by the network timeout.
    async fn fetch(&self, url: &Url, offset: u64) -> Result<FetchResponse, DownloadError> {
        let config = self.engine.config.as_ref();
        let range = HeaderValue::try_from(format!("bytes={offset}-"))
            .map_err(|e| DownloadError::invalid_input(format!("bad range header: {e}")))?;
        let mut request = FetchRequest::new(url.clone())
            .header(RANGE, range)
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if config.enable_checksum() {
            let name = HeaderName::from_bytes(CHECKSUM_REQUEST_HEADER.as_bytes())
                .map_err(|e| DownloadError::invalid_input(format!("bad checksum header: {e}")))?;
            request = request.header(name, HeaderValue::from_static(CHECKSUM_ALGORITHM));
        }

        debug!(offset, "sending request");
        tokio::select! {
            () = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            result = tokio::time::timeout(config.network_timeout(), self.engine.transport.get(request)) => {
                result.map_err(|_elapsed| DownloadError::timeout(url.as_str()))?
            }
        }
    }

    async fn backoff(&self, delay: Duration) -> Result<(), DownloadError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Checks the URL and save path, and creates the directories they need.
async fn validate(
    config: &DownloadConfig,
    url: &str,
    save_path: &Path,
) -> Result<(Url, PathBuf), DownloadError> {
    let url = validate_url(url, config.force_https())?;
    let sandbox = config.allowed_base_path();
    ensure_dir(sandbox).await?;
    let target_dir = validate_path(save_path, sandbox)?;
    ensure_dir(&target_dir).await?;
    ensure_dir(config.work_dir()).await?;
    Ok((url, target_dir))
}

async fn ensure_dir(path: &Path) -> Result<(), DownloadError> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| DownloadError::io(path, e))
}
