//! Prometheus metrics and structured logging for the mmx market maker.
//!
//! - `init_logging`: `tracing-subscriber` with `RUST_LOG` filtering, JSON in
//!   production and pretty output otherwise
//! - `Metrics`: facade over static Prometheus collectors

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
