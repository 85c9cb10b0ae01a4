//! Quoting for the mmx market maker.
//!
//! - Quote prices from mid, trend bias, inventory skew and a
//!   volatility-widened spread
//! - Avoidance of support/resistance levels and order-block zones
//! - Volatility-damped sizing and reduce-only hedges
//!
//! # Architecture
//!
//! ```text
//! MarketSnapshot + Position + Levels
//!        ↓
//!   QuoteEngine.compute_quotes()
//!        ├─ Bid / Ask  → OrderManager.reconcile()
//!        └─ Hedge      → HedgeCooldown → OrderManager.submit_reduce_only()
//! ```

pub mod config;
pub mod error;
pub mod hedge;
pub mod levels;
pub mod quote_engine;

pub use config::QuoteConfig;
pub use error::{MmError, MmResult};
pub use hedge::HedgeCooldown;
pub use levels::{Levels, Zone};
pub use quote_engine::{QuoteEngine, QuoteInstruction, QuotePrices};
