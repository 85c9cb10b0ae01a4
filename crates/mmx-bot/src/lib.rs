//! Bybit linear perpetual market maker.
//!
//! Wires the mmx crates into one process:
//! - `config`: TOML plus `MMX__` environment overrides, validated once
//! - `handlers`: public and private stream consumers
//! - `control_loop`: risk, breaker, quoting and reconcile on a fixed tick
//! - `app`: startup, main loop and orderly shutdown

pub mod app;
pub mod config;
pub mod control_loop;
pub mod error;
pub mod handlers;

pub use app::Application;
pub use config::AppConfig;
pub use control_loop::{ControlLoop, SharedState, TickOutcome};
pub use error::{AppError, AppResult};
pub use handlers::{AccountHandler, MarketHandler};
