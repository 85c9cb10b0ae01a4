//! Quoting configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{MmError, MmResult};

/// Quoting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    /// Total spread around the skewed mid in basis points.
    #[serde(default = "default_base_spread_bps")]
    pub base_spread_bps: Decimal,

    /// Cap on the widened spread.
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: Decimal,

    /// Widen the spread with volatility.
    #[serde(default = "default_true")]
    pub dynamic_spread: bool,

    /// Spread widening per bps of volatility relative to mid.
    #[serde(default = "default_volatility_spread_multiplier")]
    pub volatility_spread_multiplier: Decimal,

    /// Mid shift toward the trend (mid vs smoothed mid).
    #[serde(default = "default_trend_bias_bps")]
    pub trend_bias_bps: Decimal,

    /// Mid shift at full inventory, scaled by position / max position.
    #[serde(default = "default_inventory_skew_bps")]
    pub inventory_skew_bps: Decimal,

    /// Distance kept from support/resistance levels and order-block zones.
    #[serde(default = "default_avoidance_margin_bps")]
    pub avoidance_margin_bps: Decimal,

    /// Quote size before volatility damping, in base units.
    #[serde(default = "default_base_order_size")]
    pub base_order_size: Decimal,

    #[serde(default = "default_min_order_size")]
    pub min_order_size: Decimal,

    #[serde(default = "default_max_order_size")]
    pub max_order_size: Decimal,

    /// How strongly volatility shrinks quote size.
    #[serde(default = "default_volatility_sensitivity")]
    pub volatility_sensitivity: Decimal,

    /// |position| at or above this emits a hedge. Zero disables hedging.
    #[serde(default = "default_hedge_threshold")]
    pub hedge_threshold: Decimal,

    /// Share of |position| hedged at once.
    #[serde(default = "default_hedge_ratio")]
    pub hedge_ratio: Decimal,

    /// Minimum gap between hedges.
    #[serde(default = "default_hedge_cooldown_secs")]
    pub hedge_cooldown_secs: u64,

    /// Candles left of a pivot.
    #[serde(default = "default_pivot_left")]
    pub pivot_left: usize,

    /// Candles right of a pivot.
    #[serde(default = "default_pivot_right")]
    pub pivot_right: usize,

    /// Active order-block zones kept per direction.
    #[serde(default = "default_max_zones")]
    pub max_zones: usize,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            base_spread_bps: default_base_spread_bps(),
            max_spread_bps: default_max_spread_bps(),
            dynamic_spread: true,
            volatility_spread_multiplier: default_volatility_spread_multiplier(),
            trend_bias_bps: default_trend_bias_bps(),
            inventory_skew_bps: default_inventory_skew_bps(),
            avoidance_margin_bps: default_avoidance_margin_bps(),
            base_order_size: default_base_order_size(),
            min_order_size: default_min_order_size(),
            max_order_size: default_max_order_size(),
            volatility_sensitivity: default_volatility_sensitivity(),
            hedge_threshold: default_hedge_threshold(),
            hedge_ratio: default_hedge_ratio(),
            hedge_cooldown_secs: default_hedge_cooldown_secs(),
            pivot_left: default_pivot_left(),
            pivot_right: default_pivot_right(),
            max_zones: default_max_zones(),
        }
    }
}

impl QuoteConfig {
    pub fn validate(&self) -> MmResult<()> {
        if self.base_spread_bps <= Decimal::ZERO {
            return Err(MmError::ConfigError("base_spread_bps must be positive".into()));
        }
        if self.max_spread_bps < self.base_spread_bps {
            return Err(MmError::ConfigError(
                "max_spread_bps must be at least base_spread_bps".into(),
            ));
        }
        if self.min_order_size <= Decimal::ZERO || self.min_order_size > self.max_order_size {
            return Err(MmError::ConfigError(
                "order size bounds must satisfy 0 < min <= max".into(),
            ));
        }
        if self.base_order_size <= Decimal::ZERO {
            return Err(MmError::ConfigError("base_order_size must be positive".into()));
        }
        for (name, value) in [
            ("volatility_spread_multiplier", self.volatility_spread_multiplier),
            ("trend_bias_bps", self.trend_bias_bps),
            ("inventory_skew_bps", self.inventory_skew_bps),
            ("avoidance_margin_bps", self.avoidance_margin_bps),
            ("volatility_sensitivity", self.volatility_sensitivity),
            ("hedge_threshold", self.hedge_threshold),
        ] {
            if value < Decimal::ZERO {
                return Err(MmError::ConfigError(format!("{name} must not be negative")));
            }
        }
        if self.hedge_ratio <= Decimal::ZERO || self.hedge_ratio > Decimal::ONE {
            return Err(MmError::ConfigError("hedge_ratio must be in (0, 1]".into()));
        }
        if self.pivot_left == 0 || self.pivot_right == 0 {
            return Err(MmError::ConfigError(
                "pivot_left and pivot_right must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_base_spread_bps() -> Decimal {
    Decimal::new(20, 0) // 20 bps
}
fn default_max_spread_bps() -> Decimal {
    Decimal::new(50, 0)
}
fn default_volatility_spread_multiplier() -> Decimal {
    Decimal::new(1, 1) // 0.1
}
fn default_trend_bias_bps() -> Decimal {
    Decimal::ONE
}
fn default_inventory_skew_bps() -> Decimal {
    Decimal::new(5, 0)
}
fn default_avoidance_margin_bps() -> Decimal {
    Decimal::new(5, 0)
}
fn default_base_order_size() -> Decimal {
    Decimal::new(1, 2) // 0.01
}
fn default_min_order_size() -> Decimal {
    Decimal::new(1, 3) // 0.001
}
fn default_max_order_size() -> Decimal {
    Decimal::new(1, 1) // 0.1
}
fn default_volatility_sensitivity() -> Decimal {
    Decimal::new(50, 0)
}
fn default_hedge_threshold() -> Decimal {
    Decimal::new(5, 1) // 0.5
}
fn default_hedge_ratio() -> Decimal {
    Decimal::new(5, 1) // half the position
}
fn default_hedge_cooldown_secs() -> u64 {
    30
}
fn default_pivot_left() -> usize {
    3
}
fn default_pivot_right() -> usize {
    3
}
fn default_max_zones() -> usize {
    5
}
