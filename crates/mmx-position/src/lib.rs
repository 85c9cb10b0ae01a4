//! Position state for the mmx market maker.
//!
//! The position changes only on confirmed fills from the private stream or
//! on a full resync from the exchange's position endpoint.
//!
//! # Key Components
//!
//! - [`PositionState`]: locked position with fill dedupe and staleness tracking

pub mod error;
pub mod tracker;

pub use error::{PositionError, PositionResult};
pub use tracker::PositionState;
