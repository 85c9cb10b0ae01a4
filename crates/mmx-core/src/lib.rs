//! Core domain types for the mmx market maker.
//!
//! This crate provides fundamental types used throughout the engine:
//! - `Price`, `Size`: Precision-safe numeric types with tick/step quantization
//! - `OrderSide`, `OrderType`, `TimeInForce`, `ClientOrderId`: Order enums and ids
//! - `Order`, `OrderStatus`, `OrderRequest`, `QuoteRole`: Order lifecycle types
//! - `Position`, `Fill`: Signed position with fill accounting
//! - `Bbo`, `Candle`, `MarketSnapshot`: Market data views
//! - `InstrumentSpec`: Tick size, quantity step and order size bounds
//! - `ExponentialBackoff`: Shared reconnect/retry delay schedule

pub mod backoff;
pub mod decimal;
pub mod error;
pub mod execution;
pub mod market;
pub mod order;
pub mod position;
pub mod types;

pub use backoff::ExponentialBackoff;
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use market::InstrumentSpec;
pub use order::{ClientOrderId, OrderSide, OrderType, TimeInForce};
pub use position::{ExchangePosition, Fill, Position};
pub use types::{unix_ms, Bbo, Candle, MarketSnapshot};

// Execution types
pub use execution::{Order, OrderRequest, OrderStatus, OrderUpdate, QuoteRole};
