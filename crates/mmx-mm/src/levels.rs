//! Support/resistance levels and order-block zones from closed candles.
//!
//! A pivot low is a candle whose low is below the `left` candles before it
//! and not above the `right` candles after it. Pivot lows give support
//! levels and bullish zones (the pivot candle's range); pivot highs give
//! resistance and bearish zones. A zone is dropped once a later candle
//! closes through it.

use mmx_core::{Candle, Price};

/// Price band the quote engine keeps out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub bottom: Price,
    pub top: Price,
    /// Start time of the candle that formed the zone.
    pub start_ms: u64,
}

impl Zone {
    pub fn contains(&self, price: Price) -> bool {
        self.bottom <= price && price <= self.top
    }
}

/// Levels and zones the quote engine avoids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Levels {
    pub support: Vec<Price>,
    pub resistance: Vec<Price>,
    pub bullish_zones: Vec<Zone>,
    pub bearish_zones: Vec<Zone>,
}

impl Levels {
    /// Detect levels from closed candles, oldest first. At most `max_keep`
    /// of the most recent of each kind are kept.
    pub fn from_candles(candles: &[Candle], left: usize, right: usize, max_keep: usize) -> Self {
        let mut levels = Self::default();
        if candles.len() < left + right + 1 {
            return levels;
        }

        for i in left..candles.len() - right {
            let c = &candles[i];
            let before = &candles[i - left..i];
            let after = &candles[i + 1..=i + right];

            let pivot_low =
                before.iter().all(|o| c.low < o.low) && after.iter().all(|o| c.low <= o.low);
            let pivot_high =
                before.iter().all(|o| c.high > o.high) && after.iter().all(|o| c.high >= o.high);

            if pivot_low {
                levels.support.push(c.low);
                let later = &candles[i + 1..];
                if !later.iter().any(|o| o.close < c.low) {
                    levels.bullish_zones.push(zone_of(c));
                }
            }
            if pivot_high {
                levels.resistance.push(c.high);
                let later = &candles[i + 1..];
                if !later.iter().any(|o| o.close > c.high) {
                    levels.bearish_zones.push(zone_of(c));
                }
            }
        }

        keep_recent(&mut levels.support, max_keep);
        keep_recent(&mut levels.resistance, max_keep);
        keep_recent(&mut levels.bullish_zones, max_keep);
        keep_recent(&mut levels.bearish_zones, max_keep);
        levels
    }

    pub fn is_empty(&self) -> bool {
        self.support.is_empty()
            && self.resistance.is_empty()
            && self.bullish_zones.is_empty()
            && self.bearish_zones.is_empty()
    }
}

fn zone_of(c: &Candle) -> Zone {
    Zone {
        bottom: c.low,
        top: c.high,
        start_ms: c.start_ms,
    }
}

fn keep_recent<T>(items: &mut Vec<T>, max_keep: usize) {
    if items.len() > max_keep {
        items.drain(..items.len() - max_keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(i: u64, low: Decimal, high: Decimal, close: Decimal) -> Candle {
        Candle {
            start_ms: i * 60_000,
            open: Price::new(close),
            high: Price::new(high),
            low: Price::new(low),
            close: Price::new(close),
        }
    }

    /// V shape: lows fall to 95 then recover.
    fn valley() -> Vec<Candle> {
        vec![
            candle(0, dec!(99), dec!(101), dec!(100)),
            candle(1, dec!(97), dec!(100), dec!(98)),
            candle(2, dec!(95), dec!(98), dec!(96)),
            candle(3, dec!(96), dec!(99), dec!(98)),
            candle(4, dec!(98), dec!(101), dec!(100)),
        ]
    }

    #[test]
    fn test_pivot_low_gives_support_and_zone() {
        let levels = Levels::from_candles(&valley(), 2, 2, 5);
        assert_eq!(levels.support, vec![Price::new(dec!(95))]);
        assert_eq!(levels.bullish_zones.len(), 1);
        let zone = levels.bullish_zones[0];
        assert!(zone.contains(Price::new(dec!(97))));
        assert!(!zone.contains(Price::new(dec!(98.5))));
        assert!(levels.resistance.is_empty());
    }

    #[test]
    fn test_zone_dropped_after_close_through() {
        let mut candles = valley();
        candles.push(candle(5, dec!(93), dec!(99), dec!(94)));
        let levels = Levels::from_candles(&candles, 2, 2, 5);
        // level still reported, zone violated
        assert_eq!(levels.support, vec![Price::new(dec!(95))]);
        assert!(levels.bullish_zones.is_empty());
    }

    #[test]
    fn test_pivot_high_gives_resistance() {
        let candles = vec![
            candle(0, dec!(99), dec!(101), dec!(100)),
            candle(1, dec!(100), dec!(103), dec!(102)),
            candle(2, dec!(102), dec!(105), dec!(104)),
            candle(3, dec!(100), dec!(104), dec!(101)),
            candle(4, dec!(98), dec!(102), dec!(99)),
        ];
        let levels = Levels::from_candles(&candles, 2, 2, 5);
        assert_eq!(levels.resistance, vec![Price::new(dec!(105))]);
        assert_eq!(levels.bearish_zones.len(), 1);
    }

    #[test]
    fn test_too_few_candles() {
        let levels = Levels::from_candles(&valley()[..3], 2, 2, 5);
        assert!(levels.is_empty());
    }

    #[test]
    fn test_keeps_most_recent() {
        let mut v = vec![1, 2, 3, 4];
        keep_recent(&mut v, 2);
        assert_eq!(v, vec![3, 4]);
    }
}
