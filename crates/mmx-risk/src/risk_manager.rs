//! Per-tick position risk.
//!
//! `evaluate` is a pure function of the previous `RiskState`, the current
//! position and the market snapshot. The control loop owns the state and
//! feeds it back every tick.

use mmx_core::{
    InstrumentSpec, MarketSnapshot, OrderRequest, OrderSide, Position, Price, QuoteRole, Size,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{RebalanceOrderType, RiskConfig};

/// Stop bookkeeping for the open position.
///
/// Persisted for inspection only. Losing it on restart is safe: the next
/// tick rebuilds it from position and market.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    /// Held side the state was computed for.
    pub side: Option<OrderSide>,
    /// Entry the state was computed for.
    pub entry: Price,
    pub trailing_stop: Option<Price>,
    pub trailing_distance: Decimal,
    /// Set once the break-even move happened.
    pub break_even_price: Option<Price>,
    /// Set on a stop cross; cleared only when flat.
    pub panic_exit_armed: bool,
}

/// What the control loop should do this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskAction {
    Hold,
    /// Close the whole position. Overrides everything else.
    PanicExit(OrderRequest),
    /// Reduce the position back to the threshold.
    Rebalance(OrderRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskEvaluation {
    pub state: RiskState,
    pub action: RiskAction,
}

pub struct RiskManager {
    config: RiskConfig,
    instrument: InstrumentSpec,
}

impl RiskManager {
    /// `config` must already be validated.
    pub fn new(config: RiskConfig, instrument: InstrumentSpec) -> Self {
        Self { config, instrument }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn max_position(&self) -> Size {
        Size::new(self.config.max_position)
    }

    pub fn evaluate(
        &self,
        prev: &RiskState,
        position: &Position,
        snapshot: &MarketSnapshot,
    ) -> RiskEvaluation {
        let Some(side) = position.side() else {
            if prev.side.is_some() {
                debug!("Position flat, risk state cleared");
            }
            return RiskEvaluation {
                state: RiskState::default(),
                action: RiskAction::Hold,
            };
        };
        let entry = position.avg_entry;
        let mut state = self.carry_state(prev, side, entry);

        if state.panic_exit_armed {
            return RiskEvaluation {
                action: RiskAction::PanicExit(self.exit_order(side, position.abs_qty())),
                state,
            };
        }

        let mid = snapshot.mid;
        let distance = self.trailing_distance(snapshot.volatility, entry);
        state.trailing_distance = distance;

        let candidate = match side {
            OrderSide::Buy => mid - Price::new(distance),
            OrderSide::Sell => mid + Price::new(distance),
        };
        let mut stop = tighter(side, state.trailing_stop, candidate);

        if state.break_even_price.is_none() {
            if let Some(be) = self.break_even_level(side, entry, mid) {
                info!(side = %side, entry = %entry, mid = %mid, break_even = %be, "Break-even armed");
                state.break_even_price = Some(be);
                stop = tighter(side, Some(stop), be);
            }
        }
        state.trailing_stop = Some(stop);

        let crossed = match side {
            OrderSide::Buy => mid <= stop,
            OrderSide::Sell => mid >= stop,
        };
        if crossed {
            warn!(
                side = %side,
                qty = %position.abs_qty(),
                mid = %mid,
                stop = %stop,
                "Stop crossed, panic exit"
            );
            state.trailing_stop = None;
            state.break_even_price = None;
            state.panic_exit_armed = true;
            return RiskEvaluation {
                action: RiskAction::PanicExit(self.exit_order(side, position.abs_qty())),
                state,
            };
        }

        let action = match self.rebalance_order(side, position.abs_qty(), snapshot) {
            Some(order) => RiskAction::Rebalance(order),
            None => RiskAction::Hold,
        };
        RiskEvaluation { state, action }
    }

    /// Previous state if it still describes this position. A side change
    /// starts over; an entry change drops the stops but keeps the armed
    /// flag.
    fn carry_state(&self, prev: &RiskState, side: OrderSide, entry: Price) -> RiskState {
        if prev.side != Some(side) {
            return RiskState {
                side: Some(side),
                entry,
                ..RiskState::default()
            };
        }
        if prev.entry != entry {
            debug!(old = %prev.entry, new = %entry, "Entry changed, stops reset");
            return RiskState {
                side: Some(side),
                entry,
                panic_exit_armed: prev.panic_exit_armed,
                ..RiskState::default()
            };
        }
        prev.clone()
    }

    fn trailing_distance(&self, volatility: Decimal, entry: Price) -> Decimal {
        if volatility > Decimal::ZERO {
            volatility * self.config.trailing_stop_vol_multiplier
        } else {
            entry.inner() * self.config.fallback_stop_pct
        }
    }

    fn break_even_level(&self, side: OrderSide, entry: Price, mid: Price) -> Option<Price> {
        let profit_per_unit = match side {
            OrderSide::Buy => mid.inner() - entry.inner(),
            OrderSide::Sell => entry.inner() - mid.inner(),
        };
        let trigger =
            self.config.break_even_trigger_fraction * entry.inner() * self.config.take_profit_pct;
        if profit_per_unit < trigger {
            return None;
        }
        let offset = self.config.break_even_offset_pct;
        Some(match side {
            OrderSide::Buy => entry * (Decimal::ONE + offset),
            OrderSide::Sell => entry * (Decimal::ONE - offset),
        })
    }

    fn exit_order(&self, side: OrderSide, qty: Size) -> OrderRequest {
        OrderRequest::reduce_only_market(&self.instrument.symbol, QuoteRole::Exit, side.opposite(), qty)
    }

    fn rebalance_order(
        &self,
        side: OrderSide,
        abs_qty: Size,
        snapshot: &MarketSnapshot,
    ) -> Option<OrderRequest> {
        let threshold = Size::new(self.config.rebalance_threshold);
        if abs_qty <= threshold {
            return None;
        }
        let mut qty = (abs_qty - threshold).round_up_to_step(self.instrument.qty_step);
        if qty > abs_qty {
            qty = abs_qty;
        }
        if qty > self.instrument.max_qty {
            qty = self.instrument.max_qty;
        }
        if qty.is_zero() {
            return None;
        }

        let reduce_side = side.opposite();
        let symbol = &self.instrument.symbol;
        let order = match self.config.rebalance_order_type {
            RebalanceOrderType::Market => {
                OrderRequest::reduce_only_market(symbol, QuoteRole::Rebalance, reduce_side, qty)
            }
            RebalanceOrderType::Limit => {
                let offset = self.config.rebalance_limit_offset_pct;
                let price = match reduce_side {
                    OrderSide::Sell => self
                        .instrument
                        .ask_price(snapshot.best_bid * (Decimal::ONE - offset)),
                    OrderSide::Buy => self
                        .instrument
                        .bid_price(snapshot.best_ask * (Decimal::ONE + offset)),
                };
                OrderRequest::reduce_only_limit(symbol, QuoteRole::Rebalance, reduce_side, price, qty)
            }
        };
        info!(
            position = %abs_qty,
            threshold = %threshold,
            qty = %qty,
            side = %reduce_side,
            "Rebalance required"
        );
        Some(order)
    }
}

/// Stops only move in the position's favour.
fn tighter(side: OrderSide, current: Option<Price>, candidate: Price) -> Price {
    match (side, current) {
        (_, None) => candidate,
        (OrderSide::Buy, Some(stop)) => stop.max(candidate),
        (OrderSide::Sell, Some(stop)) => stop.min(candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mmx_core::{OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn instrument() -> InstrumentSpec {
        InstrumentSpec {
            symbol: "BTCUSDT".to_string(),
            tick_size: Price::new(dec!(0.01)),
            qty_step: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(10)),
        }
    }

    fn manager(config: RiskConfig) -> RiskManager {
        RiskManager::new(config, instrument())
    }

    fn position(qty: Decimal, entry: Decimal) -> Position {
        Position {
            qty,
            avg_entry: Price::new(entry),
            ..Position::flat("BTCUSDT")
        }
    }

    fn snapshot(mid: Decimal, volatility: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            best_bid: Price::new(mid - dec!(0.05)),
            best_ask: Price::new(mid + dec!(0.05)),
            mid: Price::new(mid),
            smoothed_mid: Price::new(mid),
            volatility,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_default_state_is_unarmed() {
        let state = RiskState::default();
        assert_eq!(state.entry, Price::ZERO);
        assert!(state.side.is_none());
        assert!(state.trailing_stop.is_none());
        assert!(!state.panic_exit_armed);
    }

    #[test]
    fn test_flat_clears_state() {
        let rm = manager(RiskConfig::default());
        let prev = RiskState {
            side: Some(OrderSide::Buy),
            panic_exit_armed: true,
            ..Default::default()
        };
        let eval = rm.evaluate(&prev, &Position::flat("BTCUSDT"), &snapshot(dec!(100), dec!(1)));
        assert_eq!(eval.state, RiskState::default());
        assert_eq!(eval.action, RiskAction::Hold);
    }

    #[test]
    fn test_long_stop_never_retreats() {
        let rm = manager(RiskConfig::default());
        let pos = position(dec!(0.1), dec!(100));

        let e1 = rm.evaluate(&RiskState::default(), &pos, &snapshot(dec!(100), dec!(1)));
        assert_eq!(e1.state.trailing_stop, Some(Price::new(dec!(98))));
        assert_eq!(e1.state.trailing_distance, dec!(2));

        let e2 = rm.evaluate(&e1.state, &pos, &snapshot(dec!(100.3), dec!(1)));
        assert_eq!(e2.state.trailing_stop, Some(Price::new(dec!(98.3))));

        let e3 = rm.evaluate(&e2.state, &pos, &snapshot(dec!(99.5), dec!(1)));
        assert_eq!(e3.state.trailing_stop, Some(Price::new(dec!(98.3))));
        assert_eq!(e3.action, RiskAction::Hold);
    }

    #[test]
    fn test_short_stop_trails_down() {
        let rm = manager(RiskConfig::default());
        let pos = position(dec!(-0.1), dec!(100));

        let e1 = rm.evaluate(&RiskState::default(), &pos, &snapshot(dec!(100), dec!(1)));
        assert_eq!(e1.state.trailing_stop, Some(Price::new(dec!(102))));

        let e2 = rm.evaluate(&e1.state, &pos, &snapshot(dec!(99.8), dec!(1)));
        assert_eq!(e2.state.trailing_stop, Some(Price::new(dec!(101.8))));

        let e3 = rm.evaluate(&e2.state, &pos, &snapshot(dec!(100.5), dec!(1)));
        assert_eq!(e3.state.trailing_stop, Some(Price::new(dec!(101.8))));
    }

    #[test]
    fn test_fallback_distance_without_volatility() {
        let rm = manager(RiskConfig::default());
        let pos = position(dec!(0.1), dec!(100));
        let eval = rm.evaluate(&RiskState::default(), &pos, &snapshot(dec!(100), Decimal::ZERO));
        // 1% of entry
        assert_eq!(eval.state.trailing_distance, dec!(1));
        assert_eq!(eval.state.trailing_stop, Some(Price::new(dec!(99))));
    }

    #[test]
    fn test_break_even_moves_once() {
        let rm = manager(RiskConfig::default());
        let pos = position(dec!(0.1), dec!(100));

        // trigger: 0.5 * 100 * 1% = 0.5 profit per unit
        let e1 = rm.evaluate(&RiskState::default(), &pos, &snapshot(dec!(100.4), dec!(1)));
        assert!(e1.state.break_even_price.is_none());

        let e2 = rm.evaluate(&e1.state, &pos, &snapshot(dec!(100.6), dec!(1)));
        let be = Price::new(dec!(100.05));
        assert_eq!(e2.state.break_even_price, Some(be));
        assert_eq!(e2.state.trailing_stop, Some(be));

        let e3 = rm.evaluate(&e2.state, &pos, &snapshot(dec!(100.6), dec!(1)));
        assert_eq!(e3.state, e2.state);

        // profit falls back below the trigger: stop stays at break-even
        let e4 = rm.evaluate(&e3.state, &pos, &snapshot(dec!(100.2), dec!(1)));
        assert_eq!(e4.state.trailing_stop, Some(be));
        assert_eq!(e4.state.break_even_price, Some(be));
    }

    #[test]
    fn test_short_break_even_below_entry() {
        let rm = manager(RiskConfig::default());
        let pos = position(dec!(-0.1), dec!(100));
        let eval = rm.evaluate(&RiskState::default(), &pos, &snapshot(dec!(99.4), dec!(1)));
        assert_eq!(eval.state.break_even_price, Some(Price::new(dec!(99.95))));
        assert_eq!(eval.state.trailing_stop, Some(Price::new(dec!(99.95))));
    }

    #[test]
    fn test_panic_exit_exactly_at_cross() {
        let rm = manager(RiskConfig::default());
        let pos = position(dec!(0.25), dec!(100));

        let e1 = rm.evaluate(&RiskState::default(), &pos, &snapshot(dec!(100), dec!(1)));
        assert_eq!(e1.state.trailing_stop, Some(Price::new(dec!(98))));

        let e2 = rm.evaluate(&e1.state, &pos, &snapshot(dec!(98.01), dec!(1)));
        assert_eq!(e2.action, RiskAction::Hold);

        let e3 = rm.evaluate(&e2.state, &pos, &snapshot(dec!(98), dec!(1)));
        match e3.action {
            RiskAction::PanicExit(ref order) => {
                assert_eq!(order.side, OrderSide::Sell);
                assert_eq!(order.qty, Size::new(dec!(0.25)));
                assert_eq!(order.order_type, OrderType::Market);
                assert!(order.reduce_only);
                assert_eq!(order.role, QuoteRole::Exit);
            }
            ref other => panic!("expected panic exit, got {other:?}"),
        }
        assert!(e3.state.panic_exit_armed);
        assert!(e3.state.trailing_stop.is_none());
        assert!(e3.state.break_even_price.is_none());
    }

    #[test]
    fn test_short_panic_exit_buys() {
        let rm = manager(RiskConfig::default());
        let pos = position(dec!(-0.1), dec!(100));
        let e1 = rm.evaluate(&RiskState::default(), &pos, &snapshot(dec!(100), dec!(1)));

        let e2 = rm.evaluate(&e1.state, &pos, &snapshot(dec!(101.99), dec!(1)));
        assert_eq!(e2.action, RiskAction::Hold);

        let e3 = rm.evaluate(&e2.state, &pos, &snapshot(dec!(102), dec!(1)));
        assert!(matches!(
            e3.action,
            RiskAction::PanicExit(ref o) if o.side == OrderSide::Buy
        ));
    }

    #[test]
    fn test_armed_until_flat() {
        let rm = manager(RiskConfig::default());
        let pos = position(dec!(0.1), dec!(100));
        let armed = RiskState {
            side: Some(OrderSide::Buy),
            entry: Price::new(dec!(100)),
            panic_exit_armed: true,
            ..Default::default()
        };

        // recovered price does not disarm
        let eval = rm.evaluate(&armed, &pos, &snapshot(dec!(105), dec!(1)));
        assert!(matches!(eval.action, RiskAction::PanicExit(_)));
        assert!(eval.state.panic_exit_armed);

        // partial fill changes nothing about the arming
        let partial = position(dec!(0.04), dec!(100));
        let eval = rm.evaluate(&eval.state, &partial, &snapshot(dec!(105), dec!(1)));
        assert!(matches!(eval.action, RiskAction::PanicExit(ref o) if o.qty == Size::new(dec!(0.04))));

        let eval = rm.evaluate(&eval.state, &Position::flat("BTCUSDT"), &snapshot(dec!(105), dec!(1)));
        assert!(!eval.state.panic_exit_armed);
    }

    #[test]
    fn test_entry_change_resets_stops() {
        let rm = manager(RiskConfig::default());
        let e1 = rm.evaluate(
            &RiskState::default(),
            &position(dec!(0.1), dec!(100)),
            &snapshot(dec!(100.6), dec!(1)),
        );
        assert!(e1.state.break_even_price.is_some());

        // added at a higher price
        let e2 = rm.evaluate(
            &e1.state,
            &position(dec!(0.2), dec!(100.5)),
            &snapshot(dec!(100.6), dec!(1)),
        );
        assert!(e2.state.break_even_price.is_none());
        assert_eq!(e2.state.entry, Price::new(dec!(100.5)));
        assert_eq!(e2.state.trailing_stop, Some(Price::new(dec!(98.6))));
    }

    #[test]
    fn test_side_flip_resets_everything() {
        let rm = manager(RiskConfig::default());
        let prev = RiskState {
            side: Some(OrderSide::Buy),
            entry: Price::new(dec!(100)),
            trailing_stop: Some(Price::new(dec!(99.5))),
            break_even_price: Some(Price::new(dec!(100.05))),
            trailing_distance: dec!(2),
            panic_exit_armed: false,
        };
        let eval = rm.evaluate(&prev, &position(dec!(-0.1), dec!(100)), &snapshot(dec!(100), dec!(1)));
        assert_eq!(eval.state.side, Some(OrderSide::Sell));
        assert_eq!(eval.state.trailing_stop, Some(Price::new(dec!(102))));
        assert!(eval.state.break_even_price.is_none());
    }

    #[test]
    fn test_rebalance_market_rounds_up() {
        let rm = manager(RiskConfig::default());
        // threshold 0.8, max 1
        let pos = position(dec!(0.9234), dec!(100));
        let eval = rm.evaluate(&RiskState::default(), &pos, &snapshot(dec!(100), dec!(1)));
        match eval.action {
            RiskAction::Rebalance(order) => {
                assert_eq!(order.side, OrderSide::Sell);
                assert_eq!(order.qty, Size::new(dec!(0.124)));
                assert_eq!(order.order_type, OrderType::Market);
                assert_eq!(order.role, QuoteRole::Rebalance);
                assert!(order.reduce_only);
            }
            other => panic!("expected rebalance, got {other:?}"),
        }
    }

    #[test]
    fn test_rebalance_limit_prices_through_touch() {
        let rm = manager(RiskConfig {
            rebalance_order_type: RebalanceOrderType::Limit,
            ..Default::default()
        });

        let long = position(dec!(1.0), dec!(100));
        let eval = rm.evaluate(&RiskState::default(), &long, &snapshot(dec!(100), dec!(1)));
        let RiskAction::Rebalance(order) = eval.action else {
            panic!("expected rebalance");
        };
        // best bid 99.95 * 0.999 = 99.85005, asks round up
        assert_eq!(order.price, Some(Price::new(dec!(99.86))));
        assert_eq!(order.tif, TimeInForce::ImmediateOrCancel);
        assert_eq!(order.qty, Size::new(dec!(0.2)));

        let short = position(dec!(-1.0), dec!(100));
        let eval = rm.evaluate(&RiskState::default(), &short, &snapshot(dec!(100), dec!(1)));
        let RiskAction::Rebalance(order) = eval.action else {
            panic!("expected rebalance");
        };
        // best ask 100.05 * 1.001 = 100.15005, bids round down
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.price, Some(Price::new(dec!(100.15))));
    }

    #[test]
    fn test_below_threshold_holds() {
        let rm = manager(RiskConfig::default());
        let eval = rm.evaluate(
            &RiskState::default(),
            &position(dec!(0.8), dec!(100)),
            &snapshot(dec!(100), dec!(1)),
        );
        assert_eq!(eval.action, RiskAction::Hold);
    }
}
