//! Atomic state snapshot.
//!
//! Written to a temp file in the same directory, synced, then renamed over
//! the target so a crash never leaves a half-written snapshot. A file that
//! fails to parse is moved aside as `<name>.corrupted_<ts>` and treated as
//! missing.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mmx_core::{Order, Position};
use mmx_risk::{CircuitBreakerState, RiskState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PersistenceError, PersistenceResult};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to resume after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub symbol: String,
    pub orders: Vec<Order>,
    pub position: Position,
    /// Informational; rebuilt every tick.
    #[serde(default)]
    pub risk_state: RiskState,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerState,
}

impl StateSnapshot {
    pub fn new(
        symbol: &str,
        orders: Vec<Order>,
        position: Position,
        risk_state: RiskState,
        circuit_breaker: CircuitBreakerState,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            symbol: symbol.to_string(),
            orders,
            position,
            risk_state,
            circuit_breaker,
        }
    }
}

/// Snapshot file at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &StateSnapshot) -> PersistenceResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.sibling(".tmp");
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.sync_dir();

        debug!(
            path = %self.path.display(),
            orders = snapshot.orders.len(),
            position = %snapshot.position.qty,
            "Snapshot saved"
        );
        Ok(())
    }

    /// `None` when there is no usable snapshot.
    pub fn load(&self) -> PersistenceResult<Option<StateSnapshot>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No snapshot found, starting fresh");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot = match serde_json::from_str::<StateSnapshot>(&text) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Snapshot unreadable");
                self.quarantine()?;
                return Ok(None);
            }
        };
        if snapshot.version != SNAPSHOT_VERSION {
            let err = PersistenceError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            };
            warn!(path = %self.path.display(), error = %err, "Snapshot rejected");
            self.quarantine()?;
            return Ok(None);
        }

        info!(
            path = %self.path.display(),
            saved_at = %snapshot.saved_at,
            orders = snapshot.orders.len(),
            position = %snapshot.position.qty,
            "Snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    /// Move the current file aside. Returns the new path.
    fn quarantine(&self) -> PersistenceResult<PathBuf> {
        let target = self.sibling(&format!(
            ".corrupted_{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        ));
        fs::rename(&self.path, &target)?;
        warn!(from = %self.path.display(), to = %target.display(), "Snapshot quarantined");
        Ok(target)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    #[cfg(unix)]
    fn sync_dir(&self) {
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        if let Err(e) = File::open(dir).and_then(|f| f.sync_all()) {
            debug!(error = %e, "Directory sync failed");
        }
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmx_core::{OrderRequest, OrderSide, OrderStatus, Price, QuoteRole, Size};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn sample() -> StateSnapshot {
        let req = OrderRequest::quote(
            "BTCUSDT",
            QuoteRole::Bid,
            OrderSide::Buy,
            Price::new(dec!(99.5)),
            Size::new(dec!(0.01)),
        );
        let mut order = Order::from_request(&req, 1_700_000_000_000);
        order.order_id = Some("ex-1".to_string());
        order.status = OrderStatus::Working;

        let position = Position {
            qty: dec!(-0.02),
            avg_entry: Price::new(dec!(101.25)),
            realized_pnl: dec!(3.5),
            ..Position::flat("BTCUSDT")
        };
        let risk = RiskState {
            side: Some(OrderSide::Sell),
            entry: Price::new(dec!(101.25)),
            trailing_stop: Some(Price::new(dec!(103))),
            ..Default::default()
        };
        StateSnapshot::new("BTCUSDT", vec![order], position, risk, CircuitBreakerState::default())
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let snap = sample();

        store.save(&snap).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snap);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_overwrite_replaces() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();

        let mut next = sample();
        next.orders.clear();
        store.save(&next).unwrap();
        assert!(store.load().unwrap().unwrap().orders.is_empty());
    }

    #[test]
    fn test_corrupted_file_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{\"version\": 1, \"orders\": [").unwrap();

        let store = SnapshotStore::new(&path);
        assert!(store.load().unwrap().is_none());
        assert!(!path.exists());

        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with("state.json.corrupted_"))
            .collect();
        assert_eq!(quarantined.len(), 1);
    }

    #[test]
    fn test_unknown_version_quarantined() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let mut snap = sample();
        snap.version = 99;
        store.save(&snap).unwrap();

        assert!(store.load().unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested/deeper/state.json"));
        store.save(&sample()).unwrap();
        assert!(store.load().unwrap().is_some());
    }
}
