//! Signed position with fill accounting.

use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{OrderSide, Price, Size};

/// Confirmed execution from the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Exchange execution id; used for dedupe.
    pub exec_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Price,
    pub qty: Size,
    /// Fee paid in quote currency (negative for rebates).
    pub fee: Decimal,
    /// Execution time (Unix milliseconds).
    pub exec_time: u64,
}

/// Position as reported by the exchange's position endpoint or topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Signed quantity (positive = long, negative = short).
    pub qty: Decimal,
    pub avg_entry: Price,
    pub unrealized_pnl: Decimal,
    pub cum_realized_pnl: Decimal,
}

/// Net position in one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed quantity (positive = long, negative = short).
    pub qty: Decimal,
    /// Average entry of the open quantity. Zero when flat.
    pub avg_entry: Price,
    /// Realized PnL in quote currency, fees excluded.
    pub realized_pnl: Decimal,
    #[serde(default)]
    pub fees_paid: Decimal,
    #[serde(default)]
    pub fill_count: u64,
}

impl Position {
    /// Flat position.
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty: Decimal::ZERO,
            avg_entry: Price::ZERO,
            realized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            fill_count: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }

    /// Held side, `None` when flat.
    pub fn side(&self) -> Option<OrderSide> {
        if self.qty > Decimal::ZERO {
            Some(OrderSide::Buy)
        } else if self.qty < Decimal::ZERO {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    /// Absolute size.
    pub fn abs_qty(&self) -> Size {
        Size::new(self.qty.abs())
    }

    /// Apply a confirmed fill.
    pub fn apply_fill(&mut self, fill: &Fill) {
        let fill_size = fill.qty.inner();
        let fill_price = fill.price.inner();
        let signed_size = fill_size * fill.side.sign();

        let old_size = self.qty;
        let new_size = old_size + signed_size;

        if (old_size > Decimal::ZERO && signed_size < Decimal::ZERO)
            || (old_size < Decimal::ZERO && signed_size > Decimal::ZERO)
        {
            let reduce_amount = signed_size.abs().min(old_size.abs());
            let pnl = if old_size > Decimal::ZERO {
                (fill_price - self.avg_entry.inner()) * reduce_amount
            } else {
                (self.avg_entry.inner() - fill_price) * reduce_amount
            };
            self.realized_pnl += pnl;
        }

        if new_size.is_zero() {
            self.avg_entry = Price::ZERO;
        } else if new_size.signum() != old_size.signum() && !old_size.is_zero() {
            // flipped: the remainder opened at the fill price
            self.avg_entry = fill.price;
        } else if new_size.signum() == signed_size.signum() || old_size.is_zero() {
            let old_notional = old_size.abs() * self.avg_entry.inner();
            let new_notional = fill_size * fill_price;
            self.avg_entry = Price::new((old_notional + new_notional) / new_size.abs());
        }

        self.qty = new_size;
        self.fees_paid += fill.fee;
        self.fill_count += 1;
    }

    /// Unrealized PnL at `mark`.
    pub fn unrealized_pnl(&self, mark: Price) -> Decimal {
        if self.is_flat() {
            return Decimal::ZERO;
        }
        (mark.inner() - self.avg_entry.inner()) * self.qty
    }

    /// Position as a fraction of `max_qty`, clamped to [-1, 1].
    pub fn inventory_ratio(&self, max_qty: Size) -> Decimal {
        if max_qty.is_zero() {
            return Decimal::ZERO;
        }
        (self.qty / max_qty.inner())
            .max(Decimal::NEGATIVE_ONE)
            .min(Decimal::ONE)
    }

    /// Would a fill of `qty` on `side` grow |position| above `max_qty`?
    /// A fill that shrinks an oversized position never exceeds.
    pub fn would_exceed(&self, side: OrderSide, qty: Size, max_qty: Size) -> bool {
        let projected = (self.qty + qty.inner() * side.sign()).abs();
        projected > max_qty.inner() && projected > self.qty.abs()
    }
}
