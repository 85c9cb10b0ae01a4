//! Order lifecycle management for the mmx market maker.
//!
//! - [`OrderManager`]: owns the working-order set and reconciles it against
//!   quote targets in two phases (cancels, then placements)
//! - [`reconcile`]: pure diff between working orders and targets
//! - [`batch`]: chunked submission through the `OrderGateway`

pub mod batch;
pub mod error;
pub mod order_manager;
pub mod reconcile;

pub use error::{ExecutorError, ExecutorResult};
pub use order_manager::OrderManager;
pub use reconcile::{CancelReason, QuoteTarget, ReconcileConfig, ReconcileReport};
