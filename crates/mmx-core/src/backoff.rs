//! Exponential backoff schedule shared by stream reconnects and REST retries.
//!
//! Delay for attempt `n` (0-based) is `min(cap, initial * 2^n)`. Jitter is
//! additive and non-negative so the jittered delay never undercuts the
//! schedule, and the sum is capped again so it never passes `cap`.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 0.1)
    }
}

impl ExponentialBackoff {
    /// `jitter_factor` is a fraction of the scheduled delay, clamped to
    /// [0, 1]. A non-finite factor disables jitter.
    pub fn new(initial: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        let jitter_factor = if jitter_factor.is_finite() {
            jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            initial,
            max_delay,
            jitter_factor,
            attempt: 0,
        }
    }

    /// Scheduled delay for a given attempt, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max_delay)
    }

    /// Next scheduled delay without jitter; advances the attempt counter.
    pub fn next_base_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Next delay with jitter; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next_base_delay();
        let jitter_range = base.as_secs_f64() * self.jitter_factor;
        if jitter_range <= 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_range);
        (base + Duration::from_secs_f64(jitter)).min(self.max_delay)
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}
