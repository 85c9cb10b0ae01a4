//! Emergency stop latch.
//!
//! Once triggered the latch stays set until the process is restarted by an
//! operator. The control loop checks it before every trading step.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

/// Reason for a hard stop.
#[derive(Debug, Clone, PartialEq)]
pub enum HardStopReason {
    /// The exchange rejected our credentials.
    AuthFailure { message: String },
    /// Panic exit kept failing after all attempts in a tick.
    PanicExitFailed { attempts: u32, error: String },
    /// Realized plus unrealized loss for the day hit the limit.
    DailyLossLimit { pnl: Decimal },
    Manual { message: String },
}

impl std::fmt::Display for HardStopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthFailure { message } => write!(f, "Authentication failed: {message}"),
            Self::PanicExitFailed { attempts, error } => {
                write!(f, "Panic exit failed after {attempts} attempts: {error}")
            }
            Self::DailyLossLimit { pnl } => write!(f, "Daily loss limit reached: {pnl}"),
            Self::Manual { message } => write!(f, "Manual: {message}"),
        }
    }
}

/// Emergency stop latch, shared via `Arc`.
pub struct HardStopLatch {
    triggered: AtomicBool,
    /// Unix milliseconds, 0 until triggered.
    triggered_at: AtomicI64,
    reason: RwLock<Option<HardStopReason>>,
}

impl Default for HardStopLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl HardStopLatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            triggered_at: AtomicI64::new(0),
            reason: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Trigger the latch. The first reason wins.
    pub fn trigger(&self, reason: HardStopReason) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.triggered_at
                .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
            *self.reason.write() = Some(reason.clone());
            error!(reason = %reason, "HARD STOP TRIGGERED");
        } else {
            warn!(new_reason = %reason, "Hard stop already triggered, ignoring new trigger");
        }
    }

    /// Unix milliseconds of the trigger, `None` if not triggered.
    #[must_use]
    pub fn triggered_at(&self) -> Option<i64> {
        if !self.is_triggered() {
            return None;
        }
        let ts = self.triggered_at.load(Ordering::SeqCst);
        (ts > 0).then_some(ts)
    }

    #[must_use]
    pub fn reason(&self) -> Option<HardStopReason> {
        if self.is_triggered() {
            self.reason.read().clone()
        } else {
            None
        }
    }

    /// Clear the latch. Only used by tests and operator tooling.
    pub fn reset(&self) {
        let previous = self.reason.write().take();
        self.triggered_at.store(0, Ordering::SeqCst);
        self.triggered.store(false, Ordering::SeqCst);
        if let Some(reason) = previous {
            info!(previous_reason = %reason, "Hard stop reset");
        }
    }
}

impl std::fmt::Debug for HardStopLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardStopLatch")
            .field("triggered", &self.is_triggered())
            .field("triggered_at", &self.triggered_at())
            .field("reason", &self.reason())
            .finish()
    }
}
