//! Byte-rate limiting for transfers.
//!
//! This module provides the [`SpeedLimiter`] seam consulted by the transfer
//! writer before each chunk is written, and [`RateLimiter`], a token-bucket
//! implementation that can be shared across engines.
//!
//! # Overview
//!
//! The limiter governs throughput only. Acquiring never fails; it only delays.
//! One `RateLimiter` wrapped in `Arc` caps the combined rate of every engine
//! it is handed to.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use resume_core::download::{RateLimiter, SpeedLimiter};
//!
//! # async fn example() {
//! // 1 MiB/s shared by every engine that gets a clone of the Arc.
//! let limiter = Arc::new(RateLimiter::new(1024 * 1024));
//! limiter.acquire(16 * 1024).await;
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// Longest single sleep inside [`RateLimiter::acquire`], so concurrent
/// acquirers interleave fairly.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Shortest sleep; float rounding must never produce a zero-length wait.
const MIN_WAIT_SLICE: Duration = Duration::from_millis(1);

/// Throttles transfer throughput.
///
/// Implementations must tolerate concurrent `acquire` calls from several
/// transferring engines.
#[async_trait]
pub trait SpeedLimiter: Send + Sync + fmt::Debug {
    /// Waits until `bytes` may be written.
    async fn acquire(&self, bytes: u64);
}

/// Token-bucket limiter measured in bytes per second.
///
/// The bucket holds at most one second of tokens and starts full, so short
/// bursts proceed immediately.
#[derive(Debug)]
pub struct RateLimiter {
    /// Refill rate and bucket capacity in bytes per second.
    bytes_per_second: u64,

    /// Whether limiting is disabled (rate 0).
    disabled: bool,

    /// Bucket state, locked for atomic refill-and-consume.
    bucket: Mutex<Bucket>,

    /// Total time callers have spent waiting (milliseconds).
    throttled_ms: AtomicU64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter allowing `bytes_per_second`. A rate of 0 disables it.
    #[must_use]
    #[instrument]
    pub fn new(bytes_per_second: u64) -> Self {
        if bytes_per_second == 0 {
            return Self::disabled();
        }
        debug!("creating rate limiter");
        Self {
            bytes_per_second,
            disabled: false,
            bucket: Mutex::new(Bucket {
                tokens: bytes_per_second as f64,
                last_refill: Instant::now(),
            }),
            throttled_ms: AtomicU64::new(0),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            bytes_per_second: 0,
            disabled: true,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
            throttled_ms: AtomicU64::new(0),
        }
    }

    /// Returns whether limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Configured rate in bytes per second (0 when disabled).
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// Cumulative time spent waiting across all callers.
    #[must_use]
    pub fn total_throttled(&self) -> Duration {
        Duration::from_millis(self.throttled_ms.load(Ordering::Relaxed))
    }

    /// Takes up to `wanted` tokens; returns how long to sleep when short.
    async fn try_take(&self, wanted: f64) -> Option<Duration> {
        let mut bucket = self.bucket.lock().await;
        let capacity = self.bytes_per_second as f64;

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * capacity).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= wanted {
            bucket.tokens -= wanted;
            return None;
        }

        let missing = wanted - bucket.tokens;
        let wait = Duration::from_secs_f64(missing / capacity);
        Some(wait.clamp(MIN_WAIT_SLICE, MAX_WAIT_SLICE))
    }
}

#[async_trait]
impl SpeedLimiter for RateLimiter {
    async fn acquire(&self, bytes: u64) {
        if self.disabled || bytes == 0 {
            return;
        }

        // Chunks larger than the bucket are paid for one bucket at a time.
        let mut remaining = bytes;
        while remaining > 0 {
            let portion = remaining.min(self.bytes_per_second);
            while let Some(wait) = self.try_take(portion as f64).await {
                trace!(wait_ms = wait.as_millis(), "throttling transfer");
                #[allow(clippy::cast_possible_truncation)]
                self.throttled_ms
                    .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
                tokio::time::sleep(wait).await;
            }
            remaining -= portion;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_initial_burst_is_immediate() {
        let limiter = RateLimiter::new(1000);
        let start = Instant::now();
        limiter.acquire(1000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_beyond_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(1000);
        let start = Instant::now();
        limiter.acquire(1000).await;
        limiter.acquire(500).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "elapsed {elapsed:?}");
        assert!(limiter.total_throttled() >= Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_chunk_is_paid_in_portions() {
        let limiter = RateLimiter::new(1000);
        let start = Instant::now();
        limiter.acquire(3000).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2200), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquirers_share_the_rate() {
        let limiter = Arc::new(RateLimiter::new(1000));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire(500).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 2000 bytes at 1000 B/s with a full 1000-byte bucket: ~1s.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(950), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_waits() {
        let limiter = RateLimiter::new(0);
        assert!(limiter.is_disabled());
        let start = Instant::now();
        limiter.acquire(u64::MAX).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
