//! Immutable engine configuration.
//!
//! A [`DownloadConfig`] is built once, usually wrapped in `Arc`, and shared
//! read-only by any number of engines. There is no process-wide mutable
//! instance; [`DownloadConfig::default`] is a starting point for the `with_*`
//! builder methods.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use super::constants::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_FILE_SIZE,
    DEFAULT_MAX_RETRIES, DEFAULT_NETWORK_TIMEOUT, DEFAULT_PROGRESS_INTERVAL,
};
use super::rate_limiter::SpeedLimiter;
use super::retry::RetryPolicy;
use super::transport::default_user_agent;

/// Where observer callbacks run.
#[derive(Debug, Clone, Default)]
pub enum NotificationContext {
    /// On the engine's own task, between I/O steps.
    #[default]
    Inline,
    /// On a separate task of the current Tokio runtime, fed in order.
    Dedicated,
    /// On a separate task of the given runtime, fed in order.
    Runtime(Handle),
}

/// Configuration shared by download engines.
///
/// # Default Values
///
/// | Field | Default |
/// |-------|---------|
/// | `max_retries` | 5 |
/// | `buffer_size` | 16 KiB |
/// | `network_timeout` | 30 s |
/// | `force_https` | true |
/// | `max_file_size` | 16 GiB |
/// | `progress_interval` | 100 KiB |
/// | `allowed_base_path` | platform download dir |
/// | `work_dir` | platform cache dir |
/// | `notification_context` | inline |
/// | `speed_limiter` | none |
/// | `enable_checksum` | true |
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    max_retries: u32,
    buffer_size: usize,
    network_timeout: Duration,
    force_https: bool,
    max_file_size: u64,
    progress_interval: u64,
    allowed_base_path: PathBuf,
    work_dir: PathBuf,
    notification_context: NotificationContext,
    speed_limiter: Option<Arc<dyn SpeedLimiter>>,
    enable_checksum: bool,
    backoff_base: Duration,
    backoff_cap: Duration,
    user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            buffer_size: DEFAULT_BUFFER_SIZE,
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
            force_https: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            allowed_base_path: default_download_dir(),
            work_dir: default_work_dir(),
            notification_context: NotificationContext::default(),
            speed_limiter: None,
            enable_checksum: true,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadConfig {
    /// Default configuration rooted at `sandbox`, with temp files under
    /// `sandbox/.partial`.
    #[must_use]
    pub fn for_sandbox(sandbox: impl Into<PathBuf>) -> Self {
        let sandbox = sandbox.into();
        Self {
            work_dir: sandbox.join(".partial"),
            allowed_base_path: sandbox,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the copy buffer size (at least 1 byte).
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    #[must_use]
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_force_https(mut self, force_https: bool) -> Self {
        self.force_https = force_https;
        self
    }

    #[must_use]
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Sets the progress granularity in bytes (at least 1).
    #[must_use]
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    #[must_use]
    pub fn with_allowed_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.allowed_base_path = path.into();
        self
    }

    #[must_use]
    pub fn with_work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_dir = path.into();
        self
    }

    #[must_use]
    pub fn with_notification_context(mut self, context: NotificationContext) -> Self {
        self.notification_context = context;
        self
    }

    #[must_use]
    pub fn with_speed_limiter(mut self, limiter: Arc<dyn SpeedLimiter>) -> Self {
        self.speed_limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn with_checksum(mut self, enable: bool) -> Self {
        self.enable_checksum = enable;
        self
    }

    /// Overrides the backoff base delay and cap.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[must_use]
    pub fn network_timeout(&self) -> Duration {
        self.network_timeout
    }

    #[must_use]
    pub fn force_https(&self) -> bool {
        self.force_https
    }

    #[must_use]
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    #[must_use]
    pub fn progress_interval(&self) -> u64 {
        self.progress_interval
    }

    #[must_use]
    pub fn allowed_base_path(&self) -> &Path {
        &self.allowed_base_path
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[must_use]
    pub fn notification_context(&self) -> &NotificationContext {
        &self.notification_context
    }

    #[must_use]
    pub fn speed_limiter(&self) -> Option<&Arc<dyn SpeedLimiter>> {
        self.speed_limiter.as_ref()
    }

    #[must_use]
    pub fn enable_checksum(&self) -> bool {
        self.enable_checksum
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Retry policy derived from `max_retries` and the backoff settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_base, self.backoff_cap)
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| std::env::temp_dir().join("downloads"))
}

fn default_work_dir() -> PathBuf {
    dirs::cache_dir().map_or_else(
        || std::env::temp_dir().join("resume-downloader").join("partial"),
        |dir| dir.join("resume-downloader").join("partial"),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::RateLimiter;

    #[test]
    fn test_default_values() {
        let config = DownloadConfig::default();
        assert_eq!(config.max_retries(), 5);
        assert_eq!(config.buffer_size(), 16 * 1024);
        assert_eq!(config.network_timeout(), Duration::from_secs(30));
        assert!(config.force_https());
        assert_eq!(config.max_file_size(), 16 * 1024 * 1024 * 1024);
        assert_eq!(config.progress_interval(), 100 * 1024);
        assert!(config.enable_checksum());
        assert!(config.speed_limiter().is_none());
        assert!(matches!(
            config.notification_context(),
            NotificationContext::Inline
        ));
    }

    #[test]
    fn test_retry_policy_reflects_config() {
        let config = DownloadConfig::default()
            .with_max_retries(2)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(15));
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries(), 2);
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(10));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(15));
    }

    #[test]
    fn test_for_sandbox_places_work_dir_inside() {
        let config = DownloadConfig::for_sandbox("/data/downloads");
        assert_eq!(config.allowed_base_path(), Path::new("/data/downloads"));
        assert_eq!(config.work_dir(), Path::new("/data/downloads/.partial"));
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let config = DownloadConfig::default()
            .with_buffer_size(0)
            .with_progress_interval(0);
        assert_eq!(config.buffer_size(), 1);
        assert_eq!(config.progress_interval(), 1);
    }

    #[test]
    fn test_shared_limiter_is_kept() {
        let limiter: Arc<dyn SpeedLimiter> = Arc::new(RateLimiter::new(1024));
        let config = DownloadConfig::default().with_speed_limiter(Arc::clone(&limiter));
        let clone = config.clone();
        assert!(Arc::ptr_eq(clone.speed_limiter().unwrap(), &limiter));
    }
}
