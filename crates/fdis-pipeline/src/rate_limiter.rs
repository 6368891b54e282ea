//! Interval-based rate limiting.
//!
//! [`RateLimiter`] lets a caller act at most once per configured interval. The
//! time of the last granted acquisition lives in a single atomic, and granting
//! is a compare-and-set on that value: two callers racing for the same slot
//! cannot both win, without any lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::PipelineError;

/// Marker for "nothing granted yet".
const NEVER: u64 = u64::MAX;

/// Grants at most one acquisition per `interval`.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    origin: Instant,
    /// Nanoseconds since `origin` of the last granted acquisition.
    last_granted: AtomicU64,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            origin: Instant::now(),
            last_granted: AtomicU64::new(NEVER),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Acquire if at least `interval` has passed since the last acquisition.
    ///
    /// Returns `false` without side effects otherwise.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(self.now()).is_ok()
    }

    /// Suspend until an acquisition succeeds.
    pub async fn wait_acquire(&self) {
        loop {
            match self.try_acquire_at(self.now()) {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Like [`RateLimiter::wait_acquire`], but gives up when `token` is cancelled.
    pub async fn wait_acquire_cancellable(
        &self,
        token: &CancellationToken,
    ) -> Result<(), PipelineError> {
        loop {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match self.try_acquire_at(self.now()) {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(NEVER - 1)
    }

    /// Commit `now` as the last granted time, or report how long to wait.
    fn try_acquire_at(&self, now: u64) -> Result<(), Duration> {
        let interval = u64::try_from(self.interval.as_nanos()).unwrap_or(NEVER - 1);
        let mut last = self.last_granted.load(Ordering::Acquire);
        loop {
            if last != NEVER {
                let next = last.saturating_add(interval);
                if now < next {
                    return Err(Duration::from_nanos(next - now));
                }
            }
            match self.last_granted.compare_exchange_weak(
                last,
                now,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                // Someone else moved the clock; re-check against their grant.
                Err(actual) => last = actual,
            }
        }
    }
}
