//! Market state aggregation.
//!
//! Folds public events into one view of the traded instrument. The market
//! handler task is the only writer; the control loop reads snapshots.

use crate::parser::{BookSide, MarketEvent};
use chrono::{DateTime, Utc};
use mmx_core::{Candle, MarketSnapshot, Price};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Smoothing and candle parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketStateConfig {
    /// EMA weight of the newest mid, in (0, 1].
    pub ema_alpha: Decimal,
    /// ATR period in candles.
    pub atr_period: usize,
    /// Candle length built from trades.
    pub candle_interval_ms: u64,
    /// Closed candles kept.
    pub max_candles: usize,
}

impl Default for MarketStateConfig {
    fn default() -> Self {
        Self {
            ema_alpha: Decimal::new(2, 1),
            atr_period: 14,
            candle_interval_ms: 60_000,
            max_candles: 200,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    bid: Option<BookSide>,
    ask: Option<BookSide>,
    smoothed_mid: Option<Price>,
    candles: VecDeque<Candle>,
    forming: Option<Candle>,
    atr: Option<Decimal>,
    atr_samples: usize,
    last_book_update: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
}

/// Aggregated market state for one instrument.
#[derive(Debug)]
pub struct MarketState {
    config: MarketStateConfig,
    inner: RwLock<Inner>,
}

impl Default for MarketState {
    fn default() -> Self {
        Self::new(MarketStateConfig::default())
    }
}

impl MarketState {
    pub fn new(config: MarketStateConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Apply one parsed public event.
    pub fn apply(&self, event: &MarketEvent) {
        match event {
            MarketEvent::TopOfBook { bid, ask, .. } => self.update_book(*bid, *ask),
            MarketEvent::Trade { price, ts, .. } => self.on_trade(*price, *ts),
            MarketEvent::Kline { candle, closed } => self.on_kline(*candle, *closed),
        }
    }

    /// Update top of book. Absent sides keep their previous value.
    pub fn update_book(&self, bid: Option<BookSide>, ask: Option<BookSide>) {
        let mut inner = self.inner.write();
        if let Some(bid) = bid {
            inner.bid = Some(bid);
        }
        if let Some(ask) = ask {
            inner.ask = Some(ask);
        }
        inner.last_book_update = Some(Instant::now());
        inner.updated_at = Some(Utc::now());

        if let (Some(b), Some(a)) = (inner.bid, inner.ask) {
            if b.price < a.price {
                let mid = (b.price.inner() + a.price.inner()) / Decimal::TWO;
                let smoothed = match inner.smoothed_mid {
                    None => mid,
                    Some(prev) => {
                        self.config.ema_alpha * mid
                            + (Decimal::ONE - self.config.ema_alpha) * prev.inner()
                    }
                };
                inner.smoothed_mid = Some(Price::new(smoothed));
            }
        }
    }

    fn on_trade(&self, price: Price, ts: u64) {
        let interval = self.config.candle_interval_ms.max(1);
        let bucket = ts - ts % interval;
        let mut inner = self.inner.write();
        let current = inner.forming;
        match current {
            None => inner.forming = Some(Candle::open_at(bucket, price)),
            Some(c) if c.start_ms == bucket => {
                if let Some(forming) = inner.forming.as_mut() {
                    forming.update(price);
                }
            }
            Some(c) if bucket > c.start_ms => {
                self.close_candle(&mut inner, c);
                inner.forming = Some(Candle::open_at(bucket, price));
            }
            // late print for an older bucket
            Some(_) => {}
        }
    }

    fn on_kline(&self, candle: Candle, closed: bool) {
        let mut inner = self.inner.write();
        if closed {
            self.close_candle(&mut inner, candle);
            if inner.forming.is_some_and(|f| f.start_ms <= candle.start_ms) {
                inner.forming = None;
            }
        } else {
            if let Some(prev) = inner.forming {
                if prev.start_ms < candle.start_ms {
                    self.close_candle(&mut inner, prev);
                }
            }
            inner.forming = Some(candle);
        }
    }

    /// Seed candles from REST klines, oldest first. Replaces history.
    pub fn prime_candles(&self, candles: &[Candle]) {
        let mut inner = self.inner.write();
        inner.candles.clear();
        inner.atr = None;
        inner.atr_samples = 0;
        for candle in candles {
            self.close_candle(&mut inner, *candle);
        }
        debug!(
            count = inner.candles.len(),
            atr = ?inner.atr,
            "Primed candles"
        );
    }

    /// Append a closed candle and advance the ATR. Candles at or before the
    /// last closed one are ignored.
    fn close_candle(&self, inner: &mut Inner, candle: Candle) {
        let prev_close = match inner.candles.back() {
            Some(last) if candle.start_ms <= last.start_ms => return,
            Some(last) => Some(last.close),
            None => None,
        };
        let tr = candle.true_range(prev_close);
        let period = Decimal::from(self.config.atr_period.max(1));

        inner.atr_samples += 1;
        inner.atr = Some(match inner.atr {
            None => tr,
            // simple mean until the period fills, Wilder smoothing after
            Some(atr) if inner.atr_samples <= self.config.atr_period => {
                let n = Decimal::from(inner.atr_samples);
                atr + (tr - atr) / n
            }
            Some(atr) => (atr * (period - Decimal::ONE) + tr) / period,
        });

        inner.candles.push_back(candle);
        while inner.candles.len() > self.config.max_candles.max(1) {
            inner.candles.pop_front();
        }
    }

    /// Current view; `None` until both sides are known and uncrossed.
    pub fn snapshot(&self) -> Option<MarketSnapshot> {
        let inner = self.inner.read();
        let (bid, ask) = (inner.bid?, inner.ask?);
        if bid.price >= ask.price {
            return None;
        }
        let mid = Price::new((bid.price.inner() + ask.price.inner()) / Decimal::TWO);
        Some(MarketSnapshot {
            best_bid: bid.price,
            best_ask: ask.price,
            mid,
            smoothed_mid: inner.smoothed_mid.unwrap_or(mid),
            volatility: inner.atr.unwrap_or_default(),
            updated_at: inner.updated_at.unwrap_or_else(Utc::now),
        })
    }

    /// Time since the last top-of-book update.
    pub fn age(&self) -> Option<Duration> {
        self.inner.read().last_book_update.map(|t| t.elapsed())
    }

    /// No book yet, or the last update is older than `window`.
    pub fn is_stale(&self, window: Duration) -> bool {
        self.age().map_or(true, |age| age > window)
    }

    pub fn volatility(&self) -> Decimal {
        self.inner.read().atr.unwrap_or_default()
    }

    /// Closed candles, oldest first.
    pub fn candles(&self) -> Vec<Candle> {
        self.inner.read().candles.iter().copied().collect()
    }

    pub fn forming_candle(&self) -> Option<Candle> {
        self.inner.read().forming
    }
}
