//! Prometheus metrics for the mmx market maker.
//!
//! # Panics
//!
//! Registration uses `unwrap()`. A failure means a duplicate metric name,
//! which is a programming error and should crash at first use during
//! startup rather than silently drop data.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_int_counter, register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, Histogram,
    IntCounter, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

const WS_STATES: [&str; 5] = [
    "disconnected",
    "connecting",
    "subscribed",
    "streaming",
    "reconnecting",
];

/// Stream state machine, one active state per stream.
/// Labels: stream (public/private), state
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "mmx_ws_state",
        "Stream state machine current state (1=active, 0=inactive)",
        &["stream", "state"]
    )
    .unwrap()
});

pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mmx_ws_reconnect_total",
        "Total stream reconnection attempts",
        &["stream"]
    )
    .unwrap()
});

/// Public messages dropped because the handler queue was full.
pub static WS_DROPPED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "mmx_ws_dropped_messages",
        "Public stream messages dropped on a full queue"
    )
    .unwrap()
});

/// Labels: kind (auth/rate_limit/insufficient_balance/validation/transient)
pub static API_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mmx_api_errors_total",
        "Exchange API errors by kind",
        &["kind"]
    )
    .unwrap()
});

/// Labels: role
pub static ORDERS_PLACED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mmx_orders_placed_total",
        "Orders acknowledged by the exchange",
        &["role"]
    )
    .unwrap()
});

/// Labels: reason
pub static ORDERS_CANCELLED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mmx_orders_cancelled_total",
        "Orders cancelled by reconcile or shutdown",
        &["reason"]
    )
    .unwrap()
});

/// Labels: kind
pub static ORDERS_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mmx_orders_rejected_total",
        "Orders rejected by the exchange",
        &["kind"]
    )
    .unwrap()
});

pub static WORKING_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("mmx_working_orders", "Orders currently tracked as working").unwrap()
});

pub static POSITION_QTY: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("mmx_position_qty", "Signed position in base units").unwrap()
});

/// Labels: kind (realized/unrealized/daily)
pub static PNL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("mmx_pnl", "PnL in quote currency", &["kind"]).unwrap()
});

pub static SPREAD_BPS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("mmx_spread_bps", "Quoted spread in basis points").unwrap()
});

pub static MARKET_DATA_AGE_MS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("mmx_market_data_age_ms", "Age of the latest market snapshot").unwrap()
});

pub static CIRCUIT_BREAKER_TRIPPED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "mmx_circuit_breaker_tripped",
        "Circuit breaker state (1=paused)"
    )
    .unwrap()
});

pub static CIRCUIT_BREAKER_TRIPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("mmx_circuit_breaker_trips_total", "Circuit breaker trips").unwrap()
});

pub static HARD_STOP: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("mmx_hard_stop", "Hard stop latch (1=triggered)").unwrap()
});

/// Labels: action (panic_exit/rebalance/hedge)
pub static RISK_ACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mmx_risk_actions_total",
        "Reduce-only actions submitted",
        &["action"]
    )
    .unwrap()
});

/// Labels: reason (stale/drift/startup)
pub static RESYNC_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mmx_resync_total",
        "Full resyncs from the exchange",
        &["reason"]
    )
    .unwrap()
});

/// Labels: outcome (traded/paused/stale/breaker/panic_exit/hard_stop)
pub static TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("mmx_ticks_total", "Control loop ticks", &["outcome"]).unwrap()
});

pub static TICK_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "mmx_tick_duration_ms",
        "Control loop tick duration in milliseconds",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the active state of a stream. All other states go to 0.
    pub fn ws_state_set(stream: &str, state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[stream, s]).set(0.0);
        }
        WS_STATE.with_label_values(&[stream, state]).set(1.0);
    }

    pub fn ws_reconnect(stream: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[stream]).inc();
    }

    pub fn ws_dropped(total: u64) {
        WS_DROPPED.set(total as f64);
    }

    pub fn api_error(kind: &str) {
        API_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn order_placed(role: &str) {
        ORDERS_PLACED_TOTAL.with_label_values(&[role]).inc();
    }

    pub fn orders_placed(role: &str, count: usize) {
        ORDERS_PLACED_TOTAL
            .with_label_values(&[role])
            .inc_by(count as f64);
    }

    pub fn orders_cancelled(reason: &str, count: usize) {
        ORDERS_CANCELLED_TOTAL
            .with_label_values(&[reason])
            .inc_by(count as f64);
    }

    pub fn orders_rejected(kind: &str, count: usize) {
        ORDERS_REJECTED_TOTAL
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }

    pub fn working_orders(count: usize) {
        WORKING_ORDERS.set(count as i64);
    }

    pub fn position(qty: f64) {
        POSITION_QTY.set(qty);
    }

    pub fn pnl(realized: f64, unrealized: f64, daily: f64) {
        PNL.with_label_values(&["realized"]).set(realized);
        PNL.with_label_values(&["unrealized"]).set(unrealized);
        PNL.with_label_values(&["daily"]).set(daily);
    }

    pub fn spread(spread_bps: f64) {
        SPREAD_BPS.set(spread_bps);
    }

    pub fn market_data_age(age_ms: f64) {
        MARKET_DATA_AGE_MS.set(age_ms);
    }

    pub fn circuit_breaker(tripped: bool) {
        CIRCUIT_BREAKER_TRIPPED.set(i64::from(tripped));
    }

    pub fn circuit_breaker_tripped() {
        CIRCUIT_BREAKER_TRIPS_TOTAL.inc();
        CIRCUIT_BREAKER_TRIPPED.set(1);
    }

    pub fn hard_stop(triggered: bool) {
        HARD_STOP.set(i64::from(triggered));
    }

    pub fn risk_action(action: &str) {
        RISK_ACTIONS_TOTAL.with_label_values(&[action]).inc();
    }

    pub fn resync(reason: &str) {
        RESYNC_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn tick(outcome: &str, duration_ms: f64) {
        TICKS_TOTAL.with_label_values(&[outcome]).inc();
        TICK_DURATION_MS.observe(duration_ms);
    }

    /// All registered metrics in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_state_single_active() {
        Metrics::ws_state_set("public", "connecting");
        Metrics::ws_state_set("public", "streaming");
        assert_eq!(WS_STATE.with_label_values(&["public", "streaming"]).get(), 1.0);
        assert_eq!(WS_STATE.with_label_values(&["public", "connecting"]).get(), 0.0);
    }

    #[test]
    fn test_counters_accumulate() {
        let before = ORDERS_PLACED_TOTAL.with_label_values(&["bid"]).get();
        Metrics::order_placed("bid");
        Metrics::orders_placed("bid", 2);
        assert_eq!(ORDERS_PLACED_TOTAL.with_label_values(&["bid"]).get(), before + 3.0);
    }

    #[test]
    fn test_gather_contains_metrics() {
        Metrics::hard_stop(false);
        Metrics::tick("traded", 3.0);
        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("mmx_hard_stop"));
        assert!(text.contains("mmx_ticks_total"));
    }
}
