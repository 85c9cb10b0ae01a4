//! Hedge rate limiting.

use std::time::{Duration, Instant};

/// Suppresses repeat hedges inside the cooldown.
#[derive(Debug)]
pub struct HedgeCooldown {
    cooldown: Duration,
    last: Option<Instant>,
}

impl HedgeCooldown {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    pub fn ready(&self, now: Instant) -> bool {
        match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
            None => true,
        }
    }

    /// Record a hedge sent at `now`.
    pub fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// `ready` and `record` in one step. Returns `false` while cooling down.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !self.ready(now) {
            return false;
        }
        self.record(now);
        true
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.last
            .map(|last| self.cooldown.saturating_sub(now.saturating_duration_since(last)))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_window() {
        let mut cd = HedgeCooldown::new(Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(cd.try_acquire(t0));
        assert!(!cd.try_acquire(t0 + Duration::from_secs(10)));
        assert_eq!(cd.remaining(t0 + Duration::from_secs(10)), Duration::from_secs(20));
        assert!(cd.try_acquire(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_ready_without_history() {
        let cd = HedgeCooldown::new(Duration::from_secs(5));
        assert!(cd.ready(Instant::now()));
        assert_eq!(cd.remaining(Instant::now()), Duration::ZERO);
    }
}
