//! Uniform retry policy for exchange calls.

use mmx_core::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ExchangeResult;

/// Bounded exponential backoff for retryable errors.
///
/// Only `Transient` and `RateLimit` errors are retried; everything else is
/// returned on the first failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Jitter as a fraction of the scheduled delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// No retries; used where the caller has its own escalation path.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> ExchangeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let mut backoff =
            ExponentialBackoff::new(self.initial_delay, self.max_delay, self.jitter_factor);
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = op_name, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts,
                        kind = e.kind(),
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable exchange error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(op = op_name, attempt, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}
