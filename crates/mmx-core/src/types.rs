//! Market data views shared across crates.

use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in Unix milliseconds.
pub fn unix_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Best Bid and Offer (BBO).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bbo {
    pub bid_price: Price,
    pub bid_size: Size,
    pub ask_price: Price,
    pub ask_size: Size,
    /// Timestamp when this BBO was received.
    pub received_at: DateTime<Utc>,
}

impl Bbo {
    /// Create a new BBO.
    pub fn new(bid_price: Price, bid_size: Size, ask_price: Price, ask_size: Size) -> Self {
        Self {
            bid_price,
            bid_size,
            ask_price,
            ask_size,
            received_at: Utc::now(),
        }
    }

    /// Both sides present and not crossed.
    pub fn is_valid(&self) -> bool {
        self.bid_price.is_positive()
            && self.ask_price.is_positive()
            && self.bid_price < self.ask_price
    }

    /// Mid price: (bid + ask) / 2. None if the book is not valid.
    pub fn mid_price(&self) -> Option<Price> {
        if !self.is_valid() {
            return None;
        }
        Some(Price::new(
            (self.bid_price.inner() + self.ask_price.inner()) / Decimal::TWO,
        ))
    }

    /// Spread: ask - bid.
    pub fn spread(&self) -> Price {
        self.ask_price - self.bid_price
    }

    /// Spread in basis points relative to mid.
    pub fn spread_bps(&self) -> Option<Decimal> {
        let mid = self.mid_price()?;
        Some(self.spread().inner() / mid.inner() * Decimal::from(10000))
    }
}

/// OHLC candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open time (Unix milliseconds).
    pub start_ms: u64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

impl Candle {
    /// Open a candle at a single price.
    pub fn open_at(start_ms: u64, price: Price) -> Self {
        Self {
            start_ms,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold a trade price into the candle.
    pub fn update(&mut self, price: Price) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
    }

    /// True range against the previous close.
    pub fn true_range(&self, prev_close: Option<Price>) -> Decimal {
        let range = self.high.inner() - self.low.inner();
        match prev_close {
            Some(pc) => range
                .max((self.high.inner() - pc.inner()).abs())
                .max((self.low.inner() - pc.inner()).abs()),
            None => range,
        }
    }
}

/// Point-in-time market view consumed by risk and quoting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub best_bid: Price,
    pub best_ask: Price,
    pub mid: Price,
    /// Exponentially smoothed mid; the trend reference.
    pub smoothed_mid: Price,
    /// ATR-style volatility in price units. Zero until enough candles.
    pub volatility: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Age of the snapshot in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.updated_at).num_milliseconds()
    }
}
