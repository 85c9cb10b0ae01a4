//! Daily loss limit.
//!
//! Realized PnL is cumulative for the process, so the guard keeps the value
//! seen at the start of each UTC day and measures against it.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DailyLossGuard {
    max_daily_loss: Decimal,
    day: Option<NaiveDate>,
    realized_at_day_start: Decimal,
}

impl DailyLossGuard {
    /// `max_daily_loss` of zero disables the guard.
    pub fn new(max_daily_loss: Decimal) -> Self {
        Self {
            max_daily_loss,
            day: None,
            realized_at_day_start: Decimal::ZERO,
        }
    }

    /// PnL for the current day.
    pub fn daily_pnl(&self, realized_total: Decimal, unrealized: Decimal) -> Decimal {
        realized_total - self.realized_at_day_start + unrealized
    }

    /// Returns `true` when the day's loss reached the limit.
    pub fn check(&mut self, realized_total: Decimal, unrealized: Decimal, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if self.day != Some(today) {
            if self.day.is_some() {
                info!(day = %today, "Daily loss baseline rolled over");
            }
            self.day = Some(today);
            self.realized_at_day_start = realized_total;
        }
        if self.max_daily_loss <= Decimal::ZERO {
            return false;
        }
        self.daily_pnl(realized_total, unrealized) <= -self.max_daily_loss
    }
}
