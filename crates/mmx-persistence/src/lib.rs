//! State persistence for the mmx market maker.
//!
//! - `SnapshotStore`: atomically written JSON snapshot of working orders,
//!   position, risk and circuit-breaker state, loaded at startup
//! - `LedgerWriter`: append-only JSON Lines ledger of fills, order events
//!   and balance updates, rotated daily; `replay_fills` rebuilds a position
//!   from it

pub mod error;
pub mod ledger;
pub mod snapshot;

pub use error::{PersistenceError, PersistenceResult};
pub use ledger::{read_records, replay_fills, LedgerEvent, LedgerRecord, LedgerWriter};
pub use snapshot::{SnapshotStore, StateSnapshot, SNAPSHOT_VERSION};
