//! Retry logic with exponential backoff for transient download failures.
//!
//! This module provides [`RetryPolicy`], which classifies a failed attempt as
//! retryable or fatal and computes the delay before the next attempt.
//!
//! # Overview
//!
//! Timeouts, refused connections, TLS handshake failures, and 5xx responses
//! are retryable. Everything else (security violations, malformed input,
//! disk errors, 4xx, 416) is fatal on the first occurrence.
//!
//! # Example
//!
//! ```
//! use resume_core::download::{DownloadError, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://example.com/file.bin", 503);
//!
//! match policy.should_retry(&error, 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (retry {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { exhausted } => {
//!         println!("Giving up (exhausted: {exhausted})");
//!     }
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::constants::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_MAX_RETRIES};
use super::error::{DownloadError, ErrorKind};

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Retry number this will be (1 for the first retry).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// `true` when the error was retryable but the retry budget is spent.
        exhausted: bool,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * 2^attempt, max_delay)
/// ```
///
/// With defaults the delays are 500ms, 1s, 2s, 4s, 8s, then 10s thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    max_retries: u32,

    /// Delay before the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BACKOFF_BASE,
            max_delay: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Creates a policy with a custom retry count, using default delays.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Returns the configured retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Upper bound on attempts: the original try plus every retry.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Determines whether to retry after `error`.
    ///
    /// `retries_used` is the zero-based count of retries already consumed.
    #[instrument(skip(self, error), fields(kind = %error.kind(), max_retries = self.max_retries))]
    pub fn should_retry(&self, error: &DownloadError, retries_used: u32) -> RetryDecision {
        if !is_retryable(error) {
            return RetryDecision::DoNotRetry { exhausted: false };
        }

        if retries_used >= self.max_retries {
            debug!(retries_used, "retry budget exhausted");
            return RetryDecision::DoNotRetry { exhausted: true };
        }

        let delay = self.backoff_delay(retries_used);
        debug!(
            retries_used,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: retries_used + 1,
        }
    }

    /// Delay to wait after `attempt` retries have been consumed.
    ///
    /// Non-decreasing in `attempt` and never above the cap.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        // Clamp the exponent so the shift cannot overflow.
        let factor = 1u32 << attempt.min(30);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Returns `true` when `error` describes a transient failure.
///
/// | Error | Retryable |
/// |-------|-----------|
/// | Timeout | yes |
/// | Connection refused | yes |
/// | TLS handshake | yes |
/// | HTTP 500-599 | yes |
/// | HTTP other | no |
/// | 416 / filename change / size limit | no |
/// | Security / input / IO | no |
#[must_use]
pub fn is_retryable(error: &DownloadError) -> bool {
    match error.kind() {
        ErrorKind::Timeout | ErrorKind::ConnectionRefused | ErrorKind::TlsHandshake => true,
        ErrorKind::HttpStatus => error
            .http_status_code()
            .is_some_and(|status| (500..=599).contains(&status)),
        _ => false,
    }
}

/// Backoff with the default base and cap: `min(500ms * 2^attempt, 10s)`.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    RetryPolicy::default().backoff_delay(attempt)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Backoff ====================

    #[test]
    fn test_backoff_delay_first_retry_is_half_second() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_delay_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(4), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_delay_caps_at_ten_seconds() {
        assert_eq!(backoff_delay(5), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(10), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_backoff_delay_is_non_decreasing() {
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = backoff_delay(attempt);
            assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
            assert!(delay <= Duration::from_millis(10_000));
            previous = delay;
        }
    }

    #[test]
    fn test_custom_policy_uses_its_own_base_and_cap() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(3));
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(3));
    }

    // ==================== Classification ====================

    #[test]
    fn test_is_retryable_transport_failures() {
        assert!(is_retryable(&DownloadError::timeout("https://a.test")));
        assert!(is_retryable(&DownloadError::connection_refused(
            "https://a.test",
            "refused"
        )));
        assert!(is_retryable(&DownloadError::tls_handshake(
            "https://a.test",
            "bad handshake"
        )));
    }

    #[test]
    fn test_is_retryable_only_server_side_statuses() {
        for status in [500, 502, 503, 504, 599] {
            assert!(is_retryable(&DownloadError::http_status("u", status)), "{status}");
        }
        for status in [400, 401, 403, 404, 429, 600] {
            assert!(!is_retryable(&DownloadError::http_status("u", status)), "{status}");
        }
    }

    #[test]
    fn test_is_retryable_fatal_kinds() {
        assert!(!is_retryable(&DownloadError::security("escape")));
        assert!(!is_retryable(&DownloadError::invalid_input("bad url")));
        assert!(!is_retryable(&DownloadError::range_not_satisfiable("u", 10)));
        assert!(!is_retryable(&DownloadError::filename_changed("a", "b")));
        assert!(!is_retryable(&DownloadError::io(
            "/tmp/x",
            std::io::Error::other("disk full")
        )));
        assert!(!is_retryable(&DownloadError::network("u", "reset")));
        assert!(!is_retryable(&DownloadError::Cancelled));
    }

    // ==================== Decisions ====================

    #[test]
    fn test_should_retry_returns_delay_and_next_attempt() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(&DownloadError::timeout("u"), 0);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_millis(500),
                attempt: 1
            }
        );
    }

    #[test]
    fn test_should_retry_stops_at_budget() {
        let policy = RetryPolicy::with_max_retries(2);
        assert!(matches!(
            policy.should_retry(&DownloadError::timeout("u"), 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert_eq!(
            policy.should_retry(&DownloadError::timeout("u"), 2),
            RetryDecision::DoNotRetry { exhausted: true }
        );
    }

    #[test]
    fn test_should_retry_fatal_is_not_exhaustion() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.should_retry(&DownloadError::http_status("u", 404), 0),
            RetryDecision::DoNotRetry { exhausted: false }
        );
    }

    #[test]
    fn test_zero_retries_allows_single_attempt() {
        let policy = RetryPolicy::with_max_retries(0);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(
            policy.should_retry(&DownloadError::timeout("u"), 0),
            RetryDecision::DoNotRetry { exhausted: true }
        );
    }
}
