//! Quote price and size calculation.
//!
//! Prices come from the mid after a trend bias and an inventory skew, with
//! a spread that widens with volatility. Bids are pushed below support and
//! bullish zones, asks above resistance and bearish zones. Everything is
//! quantized before it leaves this module.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use mmx_core::{
    InstrumentSpec, MarketSnapshot, OrderRequest, OrderSide, Position, Price, QuoteRole, Size,
};

use crate::config::QuoteConfig;
use crate::levels::Levels;

const BPS: Decimal = dec!(10000);

/// One desired order, tagged with why it exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteInstruction {
    pub role: QuoteRole,
    pub side: OrderSide,
    /// Limit price; `None` for the market hedge.
    pub price: Option<Price>,
    pub qty: Size,
    pub reduce_only: bool,
}

impl QuoteInstruction {
    pub fn is_quote(&self) -> bool {
        self.role.is_quote()
    }

    /// Order request for this instruction. Quotes are post-only limits,
    /// hedges reduce-only market orders.
    pub fn to_request(&self, symbol: &str) -> OrderRequest {
        match self.price {
            Some(price) if !self.reduce_only => {
                OrderRequest::quote(symbol, self.role, self.side, price, self.qty)
            }
            Some(price) => {
                OrderRequest::reduce_only_limit(symbol, self.role, self.side, price, self.qty)
            }
            None => OrderRequest::reduce_only_market(symbol, self.role, self.side, self.qty),
        }
    }
}

/// Quantized quote prices before size and exposure checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotePrices {
    /// `None` when avoidance pushed the bid to zero or below.
    pub bid: Option<Price>,
    pub ask: Price,
    pub spread_bps: Decimal,
    pub skewed_mid: Price,
}

pub struct QuoteEngine {
    config: QuoteConfig,
    instrument: InstrumentSpec,
    max_position: Size,
}

impl QuoteEngine {
    pub fn new(config: QuoteConfig, instrument: InstrumentSpec, max_position: Size) -> Self {
        Self {
            config,
            instrument,
            max_position,
        }
    }

    pub fn config(&self) -> &QuoteConfig {
        &self.config
    }

    pub fn instrument(&self) -> &InstrumentSpec {
        &self.instrument
    }

    /// Spread in bps for the snapshot.
    pub fn spread_bps(&self, snapshot: &MarketSnapshot) -> Decimal {
        let base = self.config.base_spread_bps;
        if !self.config.dynamic_spread
            || snapshot.volatility <= Decimal::ZERO
            || !snapshot.mid.is_positive()
        {
            return base;
        }
        let widening =
            snapshot.volatility / snapshot.mid.inner() * BPS * self.config.volatility_spread_multiplier;
        (base + widening).min(self.config.max_spread_bps)
    }

    /// Mid after trend bias and inventory skew.
    pub fn skewed_mid(&self, snapshot: &MarketSnapshot, position: &Position) -> Price {
        let mid = snapshot.mid;
        let biased = match mid.cmp(&snapshot.smoothed_mid) {
            std::cmp::Ordering::Greater => mid.offset_bps(self.config.trend_bias_bps),
            std::cmp::Ordering::Less => mid.offset_bps(-self.config.trend_bias_bps),
            std::cmp::Ordering::Equal => mid,
        };
        let ratio = position.inventory_ratio(self.max_position);
        biased - mid * (self.config.inventory_skew_bps / BPS * ratio)
    }

    /// Quote prices. `None` when the snapshot has no usable mid.
    pub fn compute_prices(
        &self,
        snapshot: &MarketSnapshot,
        position: &Position,
        levels: &Levels,
    ) -> Option<QuotePrices> {
        if !snapshot.mid.is_positive() {
            return None;
        }
        let spread_bps = self.spread_bps(snapshot);
        let skewed = self.skewed_mid(snapshot, position);
        let half = spread_bps / BPS / Decimal::TWO;

        let margin = snapshot.mid.inner() * self.config.avoidance_margin_bps / BPS;
        let mut bid = avoid_below(skewed * (Decimal::ONE - half), levels, margin);
        let mut ask = avoid_above(skewed * (Decimal::ONE + half), levels, margin);

        if bid >= ask {
            let center = Price::new((bid.inner() + ask.inner()) / Decimal::TWO);
            let base_half = self.config.base_spread_bps / BPS / Decimal::TWO;
            debug!(bid = %bid, ask = %ask, center = %center, "Quotes crossed after avoidance, recentering");
            bid = center * (Decimal::ONE - base_half);
            ask = center * (Decimal::ONE + base_half);
        }

        let bid = self.instrument.bid_price(bid);
        let mut ask = self.instrument.ask_price(ask);
        let bid = if bid.is_positive() {
            let floor = bid + self.instrument.tick_size;
            if ask < floor {
                ask = floor;
            }
            Some(bid)
        } else {
            None
        };

        Some(QuotePrices {
            bid,
            ask,
            spread_bps,
            skewed_mid: skewed,
        })
    }

    /// Quote size, damped by volatility. `None` when it rounds below the
    /// instrument minimum.
    pub fn quote_size(&self, snapshot: &MarketSnapshot) -> Option<Size> {
        let rel_vol = if snapshot.mid.is_positive() {
            snapshot.volatility.max(Decimal::ZERO) / snapshot.mid.inner()
        } else {
            Decimal::ZERO
        };
        let raw = self.config.base_order_size
            / (Decimal::ONE + rel_vol * self.config.volatility_sensitivity);
        let clamped = raw
            .max(self.config.min_order_size)
            .min(self.config.max_order_size);
        self.instrument.quantize_qty(Size::new(clamped))
    }

    /// Reduce-only hedge opposite the held side.
    pub fn hedge(&self, position: &Position) -> Option<QuoteInstruction> {
        let side = position.side()?;
        let abs = position.abs_qty();
        if self.config.hedge_threshold <= Decimal::ZERO
            || abs.inner() < self.config.hedge_threshold
        {
            return None;
        }
        let mut qty = Size::new(abs.inner() * self.config.hedge_ratio)
            .round_to_step(self.instrument.qty_step);
        if qty > abs {
            qty = abs;
        }
        if qty > self.instrument.max_qty {
            qty = self.instrument.max_qty;
        }
        if qty < self.instrument.min_qty || qty.is_zero() {
            return None;
        }
        Some(QuoteInstruction {
            role: QuoteRole::Hedge,
            side: side.opposite(),
            price: None,
            qty,
            reduce_only: true,
        })
    }

    /// Desired orders for this tick: bid, ask, then hedge. A quote that
    /// could take |position| past the maximum is left out.
    pub fn compute_quotes(
        &self,
        snapshot: &MarketSnapshot,
        position: &Position,
        levels: &Levels,
    ) -> Vec<QuoteInstruction> {
        let mut out = Vec::with_capacity(3);
        let (Some(prices), Some(qty)) = (
            self.compute_prices(snapshot, position, levels),
            self.quote_size(snapshot),
        ) else {
            return out;
        };

        if let Some(bid) = prices.bid {
            if position.would_exceed(OrderSide::Buy, qty, self.max_position) {
                debug!(position = %position.qty, qty = %qty, "Bid omitted at max exposure");
            } else {
                out.push(QuoteInstruction {
                    role: QuoteRole::Bid,
                    side: OrderSide::Buy,
                    price: Some(bid),
                    qty,
                    reduce_only: false,
                });
            }
        }
        if position.would_exceed(OrderSide::Sell, qty, self.max_position) {
            debug!(position = %position.qty, qty = %qty, "Ask omitted at max exposure");
        } else {
            out.push(QuoteInstruction {
                role: QuoteRole::Ask,
                side: OrderSide::Sell,
                price: Some(prices.ask),
                qty,
                reduce_only: false,
            });
        }
        if let Some(hedge) = self.hedge(position) {
            out.push(hedge);
        }
        out
    }
}

/// Push a bid below support levels and bullish zones it sits in, closest
/// first, so one push can land it in the next obstacle down.
fn avoid_below(bid: Price, levels: &Levels, margin: Decimal) -> Price {
    let margin = Price::new(margin);
    // (low, high, pushed-to)
    let mut obstacles: Vec<(Price, Price, Price)> = levels
        .support
        .iter()
        .map(|&s| (s, s + margin, s - margin))
        .chain(
            levels
                .bullish_zones
                .iter()
                .map(|z| (z.bottom, z.top, z.bottom - margin)),
        )
        .collect();
    obstacles.sort_by(|a, b| b.1.cmp(&a.1));

    let mut bid = bid;
    for (low, high, pushed) in obstacles {
        if low <= bid && bid <= high {
            bid = pushed;
        }
    }
    bid
}

/// Mirror of [`avoid_below`] for asks.
fn avoid_above(ask: Price, levels: &Levels, margin: Decimal) -> Price {
    let margin = Price::new(margin);
    let mut obstacles: Vec<(Price, Price, Price)> = levels
        .resistance
        .iter()
        .map(|&r| (r - margin, r, r + margin))
        .chain(
            levels
                .bearish_zones
                .iter()
                .map(|z| (z.bottom, z.top, z.top + margin)),
        )
        .collect();
    obstacles.sort_by(|a, b| a.0.cmp(&b.0));

    let mut ask = ask;
    for (low, high, pushed) in obstacles {
        if low <= ask && ask <= high {
            ask = pushed;
        }
    }
    ask
}
