//! Reconcile diff between working quotes and fresh targets.
//!
//! Pure functions over order snapshots. The order manager runs them under
//! its lock and performs the I/O afterwards.

use std::fmt;

use mmx_core::{ClientOrderId, Order, OrderSide, Price, QuoteRole, Size};
use mmx_exchange::ExchangeError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Desired resting quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteTarget {
    pub role: QuoteRole,
    pub side: OrderSide,
    pub price: Price,
    pub qty: Size,
}

/// Reconcile thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Outstanding quotes allowed per side.
    pub max_orders_per_side: usize,
    /// Cancel when the order price is further than this from the target,
    /// as a fraction of the target price (0.0005 = 0.05%).
    pub price_deviation_pct: Decimal,
    /// Cancel quotes older than this.
    pub max_order_age_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_orders_per_side: 1,
            price_deviation_pct: Decimal::new(5, 4),
            max_order_age_ms: 60_000,
        }
    }
}

/// Why a working quote is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    NoTarget,
    PriceDeviation,
    Expired,
    Excess,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTarget => write!(f, "no_target"),
            Self::PriceDeviation => write!(f, "price_deviation"),
            Self::Expired => write!(f, "expired"),
            Self::Excess => write!(f, "excess"),
        }
    }
}

/// Outcome of one reconcile call.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub cancelled: usize,
    pub cancel_failed: usize,
    pub placed: usize,
    pub rejected: usize,
    /// Targets not placed because the side was at its maximum.
    pub skipped_at_capacity: usize,
    pub errors: Vec<ExchangeError>,
}

impl ReconcileReport {
    pub fn has_auth_failure(&self) -> bool {
        self.errors.iter().any(ExchangeError::is_auth)
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn within_band(order: &Order, target: &QuoteTarget, config: &ReconcileConfig) -> bool {
    match order.price.deviation_from(target.price) {
        Some(dev) => dev <= config.price_deviation_pct,
        None => false,
    }
}

fn is_live_quote(order: &Order, side: OrderSide) -> bool {
    order.role.is_quote() && order.side == side && order.status.is_active()
}

/// Quotes to cancel, oldest excess first. Cancel-pending orders are left
/// alone.
pub fn plan_cancels<'a>(
    orders: impl IntoIterator<Item = &'a Order>,
    targets: &[QuoteTarget],
    config: &ReconcileConfig,
    now_ms: u64,
) -> Vec<(ClientOrderId, CancelReason)> {
    let orders: Vec<&Order> = orders.into_iter().collect();
    let mut cancels = Vec::new();

    for side in [OrderSide::Buy, OrderSide::Sell] {
        let side_targets: Vec<&QuoteTarget> = targets.iter().filter(|t| t.side == side).collect();
        let mut kept: Vec<&Order> = Vec::new();

        for order in orders
            .iter()
            .copied()
            .filter(|o| is_live_quote(o, side) && !o.cancel_pending)
        {
            let reason = if side_targets.is_empty() {
                Some(CancelReason::NoTarget)
            } else if !side_targets.iter().any(|t| within_band(order, t, config)) {
                Some(CancelReason::PriceDeviation)
            } else if order.age_ms(now_ms) > config.max_order_age_ms {
                Some(CancelReason::Expired)
            } else {
                None
            };
            match reason {
                Some(reason) => cancels.push((order.cloid.clone(), reason)),
                None => kept.push(order),
            }
        }

        let pending = orders
            .iter()
            .filter(|o| is_live_quote(o, side) && o.cancel_pending)
            .count();
        let allowed = config.max_orders_per_side.saturating_sub(pending);
        if kept.len() > allowed {
            kept.sort_by_key(|o| o.created_at);
            let excess = kept.len() - allowed;
            cancels.extend(
                kept.iter()
                    .take(excess)
                    .map(|o| (o.cloid.clone(), CancelReason::Excess)),
            );
        }
    }
    cancels
}

/// Targets that need a new order, limited by the per-side maximum.
/// Returns the targets to place and the number skipped at capacity.
pub fn plan_placements<'a>(
    orders: impl IntoIterator<Item = &'a Order>,
    targets: &[QuoteTarget],
    config: &ReconcileConfig,
) -> (Vec<QuoteTarget>, usize) {
    let orders: Vec<&Order> = orders.into_iter().collect();
    let mut to_place = Vec::new();
    let mut skipped = 0;

    for side in [OrderSide::Buy, OrderSide::Sell] {
        let mut outstanding = orders.iter().filter(|o| is_live_quote(o, side)).count();
        for target in targets.iter().filter(|t| t.side == side) {
            let covered = orders.iter().any(|o| {
                is_live_quote(o, side) && !o.cancel_pending && within_band(o, target, config)
            });
            if covered {
                continue;
            }
            if outstanding >= config.max_orders_per_side {
                skipped += 1;
                continue;
            }
            outstanding += 1;
            to_place.push(target.clone());
        }
    }
    (to_place, skipped)
}
