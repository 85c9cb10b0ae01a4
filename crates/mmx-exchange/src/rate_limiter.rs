//! Rolling-window rate limiter for REST calls.
//!
//! Allows at most `max_requests` within any `window`. `acquire()` waits
//! until the oldest request leaves the window, then records the new one.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Rolling-window rate limiter.
pub struct RateLimiter {
    /// Maximum requests per window.
    max_requests: usize,
    window: Duration,
    /// Timestamps of requests inside the window.
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// A zero `max_requests` is treated as one.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let max_requests = (max_requests as usize).max(1);
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Wait for a free slot and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_acquire_at(Instant::now()) {
                Ok(()) => return,
                Err(wait) => wait,
            };
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Take a slot if one is free.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now()).is_ok()
    }

    /// Take a slot, or return how long until the next one frees up.
    fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut timestamps = self.timestamps.lock();
        Self::evict(&mut timestamps, now, self.window);

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            if timestamps.len() == self.max_requests {
                warn!(
                    count = timestamps.len(),
                    max = self.max_requests,
                    "Rate limit window full"
                );
            }
            return Ok(());
        }

        let wait = timestamps
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or_default();
        Err(wait)
    }

    fn evict(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while timestamps
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= window)
        {
            timestamps.pop_front();
        }
    }

    /// Requests currently inside the window.
    pub fn current_count(&self) -> usize {
        let mut timestamps = self.timestamps.lock();
        Self::evict(&mut timestamps, Instant::now(), self.window);
        timestamps.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.max_requests.saturating_sub(self.current_count())
    }

    /// Reset rate limiter state.
    pub fn reset(&self) {
        self.timestamps.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));

        assert_eq!(limiter.current_count(), 0);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }

        assert_eq!(limiter.current_count(), 5);
        assert_eq!(limiter.remaining_capacity(), 5);
    }

    #[test]
    fn test_rate_limiter_at_limit() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }

        assert!(!limiter.try_acquire());
        assert_eq!(limiter.remaining_capacity(), 0);

        limiter.reset();
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_wait_reported_until_oldest_expires() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(limiter.try_acquire_at(t0).is_ok());
        assert!(limiter.try_acquire_at(t0 + Duration::from_secs(1)).is_ok());

        let wait = limiter
            .try_acquire_at(t0 + Duration::from_secs(4))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(6));

        // oldest slot has rolled out of the window
        assert!(limiter.try_acquire_at(t0 + Duration::from_secs(10)).is_ok());
    }

    #[tokio::test]
    async fn test_acquire_blocks_when_full() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        let mut first = task::spawn(limiter.acquire());
        assert_ready!(first.poll());
        drop(first);

        let mut second = task::spawn(limiter.acquire());
        assert_pending!(second.poll());
    }

    #[tokio::test]
    async fn test_acquire_resumes_after_window() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        limiter.acquire().await;

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(limiter.current_count(), 1);
    }
}
