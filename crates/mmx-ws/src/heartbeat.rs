//! Heartbeat monitoring.
//!
//! The exchange expects an application-level `{"op":"ping"}` on a fixed
//! interval. A connection is considered dead when a pong does not come back
//! within the pong timeout, or when nothing at all arrives within the
//! message timeout.

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct HeartbeatTimes {
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
}

/// Heartbeat manager for a single connection.
pub struct HeartbeatManager {
    /// How often to send ping.
    interval: Duration,
    /// How long to wait for pong.
    pong_timeout: Duration,
    /// Longest tolerated silence.
    message_timeout: Duration,
    times: RwLock<HeartbeatTimes>,
}

/// Outcome of a periodic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatCheck {
    Healthy,
    SendPing,
    PongTimeout,
    MessageTimeout,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    pub fn new(interval_ms: u64, pong_timeout_ms: u64, message_timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
            pong_timeout: Duration::from_millis(pong_timeout_ms),
            message_timeout: Duration::from_millis(message_timeout_ms),
            times: RwLock::new(HeartbeatTimes {
                last_ping: None,
                last_pong: None,
                last_message: Instant::now(),
                waiting_for_pong: false,
            }),
        }
    }

    /// Reset heartbeat state (called on connection).
    pub fn reset(&self) {
        let mut t = self.times.write();
        t.last_ping = None;
        t.last_pong = None;
        t.last_message = Instant::now();
        t.waiting_for_pong = false;
    }

    /// Record that a ping was sent.
    pub fn record_ping(&self) {
        let mut t = self.times.write();
        t.last_ping = Some(Instant::now());
        t.waiting_for_pong = true;
    }

    /// Record that a pong was received.
    pub fn record_pong(&self) {
        let now = Instant::now();
        let mut t = self.times.write();
        t.last_pong = Some(now);
        t.waiting_for_pong = false;
        if let Some(ping) = t.last_ping {
            debug!(rtt_ms = now.duration_since(ping).as_millis() as u64, "Received pong");
        }
    }

    /// Record that any message was received.
    pub fn record_message(&self) {
        self.times.write().last_message = Instant::now();
    }

    pub fn is_waiting_for_pong(&self) -> bool {
        self.times.read().waiting_for_pong
    }

    /// Evaluate health at `now`.
    pub fn check_at(&self, now: Instant) -> HeartbeatCheck {
        let t = *self.times.read();

        if t.waiting_for_pong {
            if let Some(ping) = t.last_ping {
                if now.saturating_duration_since(ping) > self.pong_timeout {
                    return HeartbeatCheck::PongTimeout;
                }
            }
        }
        if now.saturating_duration_since(t.last_message) > self.message_timeout {
            return HeartbeatCheck::MessageTimeout;
        }
        if !t.waiting_for_pong {
            let due = t
                .last_ping
                .map_or(true, |ping| now.saturating_duration_since(ping) >= self.interval);
            if due {
                return HeartbeatCheck::SendPing;
            }
        }
        HeartbeatCheck::Healthy
    }

    pub fn check(&self) -> HeartbeatCheck {
        self.check_at(Instant::now())
    }

    /// Wait for the next heartbeat check.
    pub async fn wait_for_check(&self) {
        let step = (self.interval / 2).min(self.pong_timeout / 2);
        tokio::time::sleep(step.max(Duration::from_millis(10))).await;
    }

    pub fn message_timeout_ms(&self) -> u64 {
        self.message_timeout.as_millis() as u64
    }
}
