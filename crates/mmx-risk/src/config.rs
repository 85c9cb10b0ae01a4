//! Risk configuration.
//!
//! Percentages are fractions: 0.01 = 1%.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{RiskError, RiskResult};

/// Order type used to rebalance an oversized position.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceOrderType {
    #[default]
    Market,
    /// Aggressive IOC limit priced through the touch.
    Limit,
}

/// Risk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Trailing distance as a multiple of the volatility estimate.
    #[serde(default = "default_trailing_stop_vol_multiplier")]
    pub trailing_stop_vol_multiplier: Decimal,

    /// Trailing distance as a fraction of entry while volatility is unknown.
    #[serde(default = "default_fallback_stop_pct")]
    pub fallback_stop_pct: Decimal,

    /// Take-profit distance as a fraction of entry. Only used to scale the
    /// break-even trigger.
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,

    /// Share of the take-profit distance that arms the break-even move.
    #[serde(default = "default_break_even_trigger_fraction")]
    pub break_even_trigger_fraction: Decimal,

    /// Break-even stop sits this far past entry, in the profitable
    /// direction.
    #[serde(default = "default_break_even_offset_pct")]
    pub break_even_offset_pct: Decimal,

    /// Hard ceiling on |position| in base units.
    #[serde(default = "default_max_position")]
    pub max_position: Decimal,

    /// |position| above this is reduced back to it.
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: Decimal,

    #[serde(default)]
    pub rebalance_order_type: RebalanceOrderType,

    /// Price offset through the touch for limit rebalances.
    #[serde(default = "default_rebalance_limit_offset_pct")]
    pub rebalance_limit_offset_pct: Decimal,

    /// Daily loss (quote currency) that trips the hard stop. Zero disables.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: Decimal,

    /// Attempts for a panic exit within one tick.
    #[serde(default = "default_panic_exit_attempts")]
    pub panic_exit_attempts: u32,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            trailing_stop_vol_multiplier: default_trailing_stop_vol_multiplier(),
            fallback_stop_pct: default_fallback_stop_pct(),
            take_profit_pct: default_take_profit_pct(),
            break_even_trigger_fraction: default_break_even_trigger_fraction(),
            break_even_offset_pct: default_break_even_offset_pct(),
            max_position: default_max_position(),
            rebalance_threshold: default_rebalance_threshold(),
            rebalance_order_type: RebalanceOrderType::default(),
            rebalance_limit_offset_pct: default_rebalance_limit_offset_pct(),
            max_daily_loss: default_max_daily_loss(),
            panic_exit_attempts: default_panic_exit_attempts(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl RiskConfig {
    /// Check consistency. The rebalance threshold is clamped to the max
    /// position.
    pub fn validate(&mut self) -> RiskResult<()> {
        let positive = [
            ("trailing_stop_vol_multiplier", self.trailing_stop_vol_multiplier),
            ("fallback_stop_pct", self.fallback_stop_pct),
            ("take_profit_pct", self.take_profit_pct),
            ("break_even_trigger_fraction", self.break_even_trigger_fraction),
            ("max_position", self.max_position),
            ("rebalance_threshold", self.rebalance_threshold),
        ];
        for (name, value) in positive {
            if value <= Decimal::ZERO {
                return Err(RiskError::ConfigError(format!("{name} must be positive")));
            }
        }
        for (name, value) in [
            ("break_even_offset_pct", self.break_even_offset_pct),
            ("rebalance_limit_offset_pct", self.rebalance_limit_offset_pct),
            ("max_daily_loss", self.max_daily_loss),
        ] {
            if value < Decimal::ZERO {
                return Err(RiskError::ConfigError(format!("{name} must not be negative")));
            }
        }
        if self.break_even_offset_pct >= self.break_even_trigger_fraction * self.take_profit_pct {
            return Err(RiskError::ConfigError(
                "break_even_offset_pct must be below break_even_trigger_fraction * take_profit_pct"
                    .to_string(),
            ));
        }
        if self.panic_exit_attempts == 0 {
            return Err(RiskError::ConfigError(
                "panic_exit_attempts must be at least 1".to_string(),
            ));
        }
        if self.rebalance_threshold > self.max_position {
            warn!(
                threshold = %self.rebalance_threshold,
                max_position = %self.max_position,
                "rebalance_threshold above max_position, clamping"
            );
            self.rebalance_threshold = self.max_position;
        }
        self.circuit_breaker.validate()
    }
}

fn default_trailing_stop_vol_multiplier() -> Decimal {
    Decimal::new(2, 0)
}
fn default_fallback_stop_pct() -> Decimal {
    Decimal::new(1, 2) // 1%
}
fn default_take_profit_pct() -> Decimal {
    Decimal::new(1, 2) // 1%
}
fn default_break_even_trigger_fraction() -> Decimal {
    Decimal::new(5, 1) // half way to take-profit
}
fn default_break_even_offset_pct() -> Decimal {
    Decimal::new(5, 4) // 0.05%
}
fn default_max_position() -> Decimal {
    Decimal::new(1, 0)
}
fn default_rebalance_threshold() -> Decimal {
    Decimal::new(8, 1)
}
fn default_rebalance_limit_offset_pct() -> Decimal {
    Decimal::new(1, 3) // 0.1%
}
fn default_max_daily_loss() -> Decimal {
    Decimal::new(500, 0)
}
fn default_panic_exit_attempts() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_is_valid() {
        let mut config = RiskConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_clamped_to_max_position() {
        let mut config = RiskConfig {
            max_position: dec!(2),
            rebalance_threshold: dec!(5),
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.rebalance_threshold, dec!(2));
    }

    #[test]
    fn test_break_even_offset_must_leave_profit() {
        let mut config = RiskConfig {
            take_profit_pct: dec!(0.01),
            break_even_trigger_fraction: dec!(0.5),
            break_even_offset_pct: dec!(0.005),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_values_rejected() {
        let mut config = RiskConfig {
            max_position: dec!(-1),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = RiskConfig {
            max_daily_loss: dec!(-1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: RiskConfig =
            serde_json::from_str(r#"{"max_position": "3", "rebalance_order_type": "limit"}"#)
                .unwrap();
        assert_eq!(config.max_position, dec!(3));
        assert_eq!(config.rebalance_order_type, RebalanceOrderType::Limit);
        assert_eq!(config.trailing_stop_vol_multiplier, dec!(2));
    }
}
