//! Market data for the mmx market maker.
//!
//! Turns stream payloads into typed events and folds public events into a
//! single `MarketState`: top of book, smoothed mid, candles and an ATR
//! volatility estimate.

pub mod error;
pub mod market_state;
pub mod parser;

pub use error::{FeedError, FeedResult};
pub use market_state::{MarketState, MarketStateConfig};
pub use parser::{AccountEvent, BookSide, MarketEvent, MessageParser};
