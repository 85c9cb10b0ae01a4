//! Instrument specification.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::{Price, Size};

/// Trading rules for a single instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Minimum price increment.
    pub tick_size: Price,
    /// Quantity increment.
    pub qty_step: Size,
    /// Minimum order quantity.
    pub min_qty: Size,
    /// Maximum order quantity.
    pub max_qty: Size,
}

impl InstrumentSpec {
    /// Check the instrument rules are internally consistent.
    pub fn validate(&self) -> Result<()> {
        if !self.tick_size.is_positive() {
            return Err(CoreError::InvalidInstrument(format!(
                "{}: tick_size must be positive",
                self.symbol
            )));
        }
        if !self.qty_step.is_positive() {
            return Err(CoreError::InvalidInstrument(format!(
                "{}: qty_step must be positive",
                self.symbol
            )));
        }
        if self.min_qty > self.max_qty {
            return Err(CoreError::InvalidInstrument(format!(
                "{}: min_qty {} exceeds max_qty {}",
                self.symbol, self.min_qty, self.max_qty
            )));
        }
        Ok(())
    }

    /// Quantize a buy price (round down).
    pub fn bid_price(&self, price: Price) -> Price {
        price.round_to_tick(self.tick_size)
    }

    /// Quantize a sell price (round up).
    pub fn ask_price(&self, price: Price) -> Price {
        price.round_up_to_tick(self.tick_size)
    }

    /// Quantize a quantity down to the step. Returns `None` below the
    /// minimum order size; caps at the maximum.
    pub fn quantize_qty(&self, qty: Size) -> Option<Size> {
        let capped = if qty > self.max_qty { self.max_qty } else { qty };
        let q = capped.round_to_step(self.qty_step);
        if q < self.min_qty || q.is_zero() {
            None
        } else {
            Some(q)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec() -> InstrumentSpec {
        InstrumentSpec {
            symbol: "BTCUSDT".to_string(),
            tick_size: Price::new(dec!(0.1)),
            qty_step: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(1)),
        }
    }

    #[test]
    fn test_quantize_qty() {
        let s = spec();
        assert_eq!(s.quantize_qty(Size::new(dec!(0.0159))), Some(Size::new(dec!(0.015))));
        assert_eq!(s.quantize_qty(Size::new(dec!(0.0004))), None);
        assert_eq!(s.quantize_qty(Size::new(dec!(5))), Some(Size::new(dec!(1))));
    }

    #[test]
    fn test_price_quantization_direction() {
        let s = spec();
        assert_eq!(s.bid_price(Price::new(dec!(100.05))), Price::new(dec!(100.0)));
        assert_eq!(s.ask_price(Price::new(dec!(100.05))), Price::new(dec!(100.1)));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut s = spec();
        assert!(s.validate().is_ok());
        s.min_qty = Size::new(dec!(2));
        assert!(s.validate().is_err());
    }
}
