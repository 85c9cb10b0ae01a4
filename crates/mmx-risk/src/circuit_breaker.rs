//! Price-move circuit breaker.
//!
//! Mid prices are recorded over a rolling window. A move beyond the
//! threshold between the oldest and newest point trips the breaker: trading
//! pauses, then a cooldown follows during which it cannot trip again.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use mmx_core::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RiskError, RiskResult};

/// Circuit breaker parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Move over the window that trips, as a fraction (0.02 = 2%).
    #[serde(default = "default_threshold_pct")]
    pub threshold_pct: Decimal,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold_pct: default_threshold_pct(),
            window_secs: default_window_secs(),
            pause_secs: default_pause_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.threshold_pct <= Decimal::ZERO {
            return Err(RiskError::ConfigError(
                "circuit_breaker.threshold_pct must be positive".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(RiskError::ConfigError(
                "circuit_breaker.window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_threshold_pct() -> Decimal {
    Decimal::new(2, 2)
}
fn default_window_secs() -> u64 {
    10
}
fn default_pause_secs() -> u64 {
    60
}
fn default_cooldown_secs() -> u64 {
    300
}

/// Persisted breaker state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub tripped: bool,
    pub pause_until: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Circuit breaker over recent mid prices.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    points: VecDeque<(DateTime<Utc>, Price)>,
    state: CircuitBreakerState,
}

fn secs(s: u64) -> Duration {
    Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX / 1000))
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            points: VecDeque::new(),
            state: CircuitBreakerState::default(),
        }
    }

    /// Resume from persisted state. Price history starts empty.
    pub fn restore(&mut self, state: CircuitBreakerState) {
        self.state = state;
        self.points.clear();
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    /// True while tripped and the pause has not elapsed. Untrips once it
    /// has.
    pub fn is_paused(&mut self, now: DateTime<Utc>) -> bool {
        if !self.state.tripped {
            return false;
        }
        match self.state.pause_until {
            Some(until) if now < until => true,
            _ => {
                self.state.tripped = false;
                info!(cooldown_until = ?self.state.cooldown_until, "Circuit breaker pause elapsed");
                false
            }
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.state.cooldown_until.is_some_and(|until| now < until)
    }

    /// Record a mid and check the move over the window. Returns `true` if
    /// this call tripped the breaker.
    pub fn record(&mut self, now: DateTime<Utc>, mid: Price) -> bool {
        let horizon = now - secs(self.config.window_secs);
        while self.points.front().is_some_and(|(t, _)| *t < horizon) {
            self.points.pop_front();
        }
        self.points.push_back((now, mid));

        if self.state.tripped || self.in_cooldown(now) {
            return false;
        }

        let Some(&(_, first)) = self.points.front() else {
            return false;
        };
        let Some(change) = mid.deviation_from(first) else {
            return false;
        };
        if change <= self.config.threshold_pct {
            return false;
        }

        let pause_until = now + secs(self.config.pause_secs);
        self.state = CircuitBreakerState {
            tripped: true,
            pause_until: Some(pause_until),
            cooldown_until: Some(pause_until + secs(self.config.cooldown_secs)),
        };
        self.points.clear();
        warn!(
            from = %first,
            to = %mid,
            change = %change,
            pause_until = %pause_until,
            "Circuit breaker tripped"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig::default())
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_small_moves_do_not_trip() {
        let mut cb = breaker();
        let now = t0();
        assert!(!cb.record(now, Price::new(dec!(100))));
        assert!(!cb.record(now + Duration::seconds(5), Price::new(dec!(101.5))));
        assert!(!cb.is_paused(now + Duration::seconds(5)));
    }

    #[test]
    fn test_trip_pause_cooldown_cycle() {
        let mut cb = breaker();
        let now = t0();
        cb.record(now, Price::new(dec!(100)));
        assert!(cb.record(now + Duration::seconds(3), Price::new(dec!(97.5))));

        let tripped_at = now + Duration::seconds(3);
        assert!(cb.is_paused(tripped_at + Duration::seconds(59)));

        // pause over, cooldown active
        let after_pause = tripped_at + Duration::seconds(60);
        assert!(!cb.is_paused(after_pause));
        assert!(cb.in_cooldown(after_pause));
        cb.record(after_pause, Price::new(dec!(100)));
        assert!(!cb.record(after_pause + Duration::seconds(1), Price::new(dec!(90))));

        // cooldown over, can trip again
        let later = tripped_at + Duration::seconds(360);
        assert!(!cb.in_cooldown(later));
        cb.record(later, Price::new(dec!(100)));
        assert!(cb.record(later + Duration::seconds(1), Price::new(dec!(103))));
    }

    #[test]
    fn test_old_points_leave_window() {
        let mut cb = breaker();
        let now = t0();
        cb.record(now, Price::new(dec!(100)));
        // 11s later the first point is outside the 10s window
        assert!(!cb.record(now + Duration::seconds(11), Price::new(dec!(95))));
    }

    #[test]
    fn test_state_round_trip() {
        let mut cb = breaker();
        let now = t0();
        cb.record(now, Price::new(dec!(100)));
        cb.record(now + Duration::seconds(1), Price::new(dec!(110)));

        let json = serde_json::to_string(cb.state()).unwrap();
        let state: CircuitBreakerState = serde_json::from_str(&json).unwrap();

        let mut restored = breaker();
        restored.restore(state);
        assert!(restored.is_paused(now + Duration::seconds(30)));
    }
}
