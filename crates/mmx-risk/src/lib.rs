//! Risk control for the mmx market maker.
//!
//! - `RiskManager`: trailing stop, one-shot break-even move, panic exit and
//!   rebalance, evaluated every tick from position and market snapshot
//! - `CircuitBreaker`: pauses trading after a sharp price move, then cools
//!   down
//! - `DailyLossGuard`: realized plus unrealized loss limit per UTC day
//! - `HardStopLatch`: emergency stop that stays set until restart

pub mod circuit_breaker;
pub mod config;
pub mod daily_loss;
pub mod error;
pub mod hard_stop;
pub mod risk_manager;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use config::{RebalanceOrderType, RiskConfig};
pub use daily_loss::DailyLossGuard;
pub use error::{RiskError, RiskResult};
pub use hard_stop::{HardStopLatch, HardStopReason};
pub use risk_manager::{RiskAction, RiskEvaluation, RiskManager, RiskState};
