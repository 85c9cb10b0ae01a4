//! Position tracking.
//!
//! One `parking_lot::Mutex` guards the position, the seen execution ids and
//! the confirmation time. The account handler is the only writer; the
//! control loop takes snapshots.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use mmx_core::{ExchangePosition, Fill, Position, Price};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::{PositionError, PositionResult};

/// Execution ids remembered for dedupe.
const MAX_SEEN_EXEC_IDS: usize = 10_000;

#[derive(Debug)]
struct Inner {
    position: Position,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    last_confirmed: Option<Instant>,
    exchange_unrealized: Decimal,
    equity: Option<Decimal>,
    drift: bool,
}

impl Inner {
    fn remember(&mut self, exec_id: &str) -> bool {
        if !self.seen.insert(exec_id.to_string()) {
            return false;
        }
        self.seen_order.push_back(exec_id.to_string());
        while self.seen_order.len() > MAX_SEEN_EXEC_IDS {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

/// Position state for one symbol.
#[derive(Debug)]
pub struct PositionState {
    symbol: String,
    inner: Mutex<Inner>,
}

impl PositionState {
    /// Flat, unconfirmed position.
    pub fn new(symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self {
            inner: Mutex::new(Inner {
                position: Position::flat(&symbol),
                seen: HashSet::new(),
                seen_order: VecDeque::new(),
                last_confirmed: None,
                exchange_unrealized: Decimal::ZERO,
                equity: None,
                drift: false,
            }),
            symbol,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Load a persisted position. It stays unconfirmed until the next
    /// resync.
    pub fn restore(&self, position: Position) {
        let mut inner = self.inner.lock();
        inner.position = position;
        inner.last_confirmed = None;
    }

    /// Apply a confirmed fill. Returns `false` for a duplicate execution.
    pub fn apply_fill(&self, fill: &Fill) -> PositionResult<bool> {
        if fill.symbol != self.symbol {
            return Err(PositionError::SymbolMismatch {
                expected: self.symbol.clone(),
                got: fill.symbol.clone(),
            });
        }

        let mut inner = self.inner.lock();
        if !inner.remember(&fill.exec_id) {
            debug!(exec_id = %fill.exec_id, "Duplicate fill ignored");
            return Ok(false);
        }
        inner.position.apply_fill(fill);
        inner.last_confirmed = Some(Instant::now());
        debug!(
            exec_id = %fill.exec_id,
            side = %fill.side,
            price = %fill.price,
            qty = %fill.qty,
            position = %inner.position.qty,
            "Fill applied"
        );
        Ok(true)
    }

    /// Replace size and entry with the exchange's view. Realized PnL and
    /// fees accumulated locally are kept. Returns `true` if the local view
    /// had drifted.
    pub fn sync_from_exchange(&self, exchange: &ExchangePosition) -> bool {
        let mut inner = self.inner.lock();
        let drifted = inner.position.qty != exchange.qty;
        if drifted {
            warn!(
                local = %inner.position.qty,
                exchange = %exchange.qty,
                "Position drift corrected by resync"
            );
        }
        inner.position.qty = exchange.qty;
        inner.position.avg_entry = if exchange.qty.is_zero() {
            Price::ZERO
        } else {
            exchange.avg_entry
        };
        inner.exchange_unrealized = exchange.unrealized_pnl;
        inner.last_confirmed = Some(Instant::now());
        inner.drift = false;
        drifted
    }

    /// Resync to flat when the exchange reports no position.
    pub fn sync_flat(&self) -> bool {
        self.sync_from_exchange(&ExchangePosition {
            symbol: self.symbol.clone(),
            qty: Decimal::ZERO,
            avg_entry: Price::ZERO,
            unrealized_pnl: Decimal::ZERO,
            cum_realized_pnl: Decimal::ZERO,
        })
    }

    /// Apply a private `position` topic update. A size mismatch is not
    /// applied; it flags the view for a REST resync instead.
    pub fn on_exchange_update(&self, exchange: &ExchangePosition) {
        let mut inner = self.inner.lock();
        inner.exchange_unrealized = exchange.unrealized_pnl;
        if inner.position.qty == exchange.qty {
            inner.last_confirmed = Some(Instant::now());
        } else if !inner.drift {
            // fills may still be in flight; resync decides
            info!(
                local = %inner.position.qty,
                exchange = %exchange.qty,
                "Position update disagrees with local view"
            );
            inner.drift = true;
        }
    }

    pub fn snapshot(&self) -> Position {
        self.inner.lock().position.clone()
    }

    /// Not confirmed within `window`, never confirmed, or flagged as
    /// drifted.
    pub fn is_stale(&self, window: Duration) -> bool {
        let inner = self.inner.lock();
        inner.drift || inner.last_confirmed.map_or(true, |t| t.elapsed() > window)
    }

    pub fn mark_confirmed(&self) {
        self.inner.lock().last_confirmed = Some(Instant::now());
    }

    pub fn update_equity(&self, equity: Decimal) {
        self.inner.lock().equity = Some(equity);
    }

    /// Last reported account equity.
    pub fn equity(&self) -> Option<Decimal> {
        self.inner.lock().equity
    }

    /// Unrealized PnL at `mark`, from the local position.
    pub fn unrealized_pnl(&self, mark: Price) -> Decimal {
        self.inner.lock().position.unrealized_pnl(mark)
    }

    /// Unrealized PnL last reported by the exchange.
    pub fn exchange_unrealized_pnl(&self) -> Decimal {
        self.inner.lock().exchange_unrealized
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.inner.lock().position.realized_pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmx_core::{OrderSide, Size};
    use rust_decimal_macros::dec;

    fn fill(exec_id: &str, side: OrderSide, price: Decimal, qty: Decimal) -> Fill {
        Fill {
            exec_id: exec_id.to_string(),
            order_id: "o1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side,
            price: Price::new(price),
            qty: Size::new(qty),
            fee: dec!(0.01),
            exec_time: 0,
        }
    }

    fn exchange(qty: Decimal, entry: Decimal) -> ExchangePosition {
        ExchangePosition {
            symbol: "BTCUSDT".to_string(),
            qty,
            avg_entry: Price::new(entry),
            unrealized_pnl: dec!(0),
            cum_realized_pnl: dec!(0),
        }
    }

    #[test]
    fn test_new_is_flat_and_stale() {
        let state = PositionState::new("BTCUSDT");
        assert!(state.snapshot().is_flat());
        assert!(state.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_fill_updates_position_and_confirms() {
        let state = PositionState::new("BTCUSDT");
        assert!(state
            .apply_fill(&fill("e1", OrderSide::Buy, dec!(100), dec!(2)))
            .unwrap());
        assert!(state
            .apply_fill(&fill("e2", OrderSide::Sell, dec!(110), dec!(1)))
            .unwrap());

        let pos = state.snapshot();
        assert_eq!(pos.qty, dec!(1));
        assert_eq!(pos.avg_entry, Price::new(dec!(100)));
        assert_eq!(pos.realized_pnl, dec!(10));
        assert_eq!(pos.fees_paid, dec!(0.02));
        assert!(!state.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_duplicate_exec_id_ignored() {
        let state = PositionState::new("BTCUSDT");
        let f = fill("e1", OrderSide::Buy, dec!(100), dec!(1));
        assert!(state.apply_fill(&f).unwrap());
        assert!(!state.apply_fill(&f).unwrap());
        assert_eq!(state.snapshot().qty, dec!(1));
    }

    #[test]
    fn test_wrong_symbol_rejected() {
        let state = PositionState::new("ETHUSDT");
        let f = fill("e1", OrderSide::Buy, dec!(100), dec!(1));
        assert!(matches!(
            state.apply_fill(&f),
            Err(PositionError::SymbolMismatch { .. })
        ));
    }

    #[test]
    fn test_sync_corrects_drift_and_keeps_realized() {
        let state = PositionState::new("BTCUSDT");
        state
            .apply_fill(&fill("e1", OrderSide::Buy, dec!(100), dec!(2)))
            .unwrap();
        state
            .apply_fill(&fill("e2", OrderSide::Sell, dec!(105), dec!(1)))
            .unwrap();

        assert!(state.sync_from_exchange(&exchange(dec!(-0.5), dec!(104))));
        let pos = state.snapshot();
        assert_eq!(pos.qty, dec!(-0.5));
        assert_eq!(pos.avg_entry, Price::new(dec!(104)));
        assert_eq!(pos.realized_pnl, dec!(5));

        assert!(!state.sync_from_exchange(&exchange(dec!(-0.5), dec!(104))));
        assert!(state.sync_flat());
        assert!(state.snapshot().is_flat());
        assert_eq!(state.snapshot().avg_entry, Price::ZERO);
    }

    #[test]
    fn test_stream_update_mismatch_flags_stale() {
        let state = PositionState::new("BTCUSDT");
        state.sync_flat();
        assert!(!state.is_stale(Duration::from_secs(60)));

        state.on_exchange_update(&exchange(dec!(1), dec!(100)));
        assert!(state.is_stale(Duration::from_secs(60)));
        // not applied
        assert!(state.snapshot().is_flat());

        state.sync_from_exchange(&exchange(dec!(1), dec!(100)));
        assert!(!state.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_exchange_unrealized_pnl_tracked() {
        let state = PositionState::new("BTCUSDT");
        let mut reported = exchange(dec!(1), dec!(100));
        reported.unrealized_pnl = dec!(2.5);
        state.sync_from_exchange(&reported);
        assert_eq!(state.exchange_unrealized_pnl(), dec!(2.5));
        assert_eq!(state.unrealized_pnl(Price::new(dec!(103))), dec!(3));

        reported.unrealized_pnl = dec!(-1);
        state.on_exchange_update(&reported);
        assert_eq!(state.exchange_unrealized_pnl(), dec!(-1));
    }

    #[test]
    fn test_restore_is_unconfirmed() {
        let state = PositionState::new("BTCUSDT");
        let mut pos = Position::flat("BTCUSDT");
        pos.qty = dec!(3);
        state.restore(pos);
        assert_eq!(state.snapshot().qty, dec!(3));
        assert!(state.is_stale(Duration::from_secs(60)));
        state.mark_confirmed();
        assert!(!state.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_dedupe_window_is_bounded() {
        let state = PositionState::new("BTCUSDT");
        for i in 0..(MAX_SEEN_EXEC_IDS + 5) {
            let side = if i % 2 == 0 { OrderSide::Buy } else { OrderSide::Sell };
            state
                .apply_fill(&fill(&format!("e{i}"), side, dec!(100), dec!(1)))
                .unwrap();
        }
        assert!(state.inner.lock().seen.len() <= MAX_SEEN_EXEC_IDS);
    }
}
