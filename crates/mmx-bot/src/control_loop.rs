//! Fixed-cadence trading loop.
//!
//! One `tick` per interval, in this order:
//!
//! 1. drain the ledger queue filled by the account handler;
//! 2. hard stop: only a pending panic exit may still run;
//! 3. stale market data pauses quoting with working orders left in place;
//! 4. a stale or drifted account view is resynced from REST first;
//! 5. daily loss limit;
//! 6. position risk: a panic exit ends the tick, even during a breaker
//!    pause;
//! 7. the circuit breaker: a pause or a fresh trip ends the tick;
//! 8. quotes are reconciled, then at most one reduce-only order
//!    (rebalance before hedge) is submitted;
//! 9. gauges and the periodic snapshot.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mmx_core::{
    unix_ms, ClientOrderId, ExponentialBackoff, MarketSnapshot, OrderRequest, Position,
};
use mmx_exchange::{DynOrderGateway, ExchangeError};
use mmx_executor::{ExecutorError, ExecutorResult, OrderManager, QuoteTarget, ReconcileReport};
use mmx_feed::MarketState;
use mmx_mm::{HedgeCooldown, Levels, QuoteEngine};
use mmx_persistence::{LedgerEvent, LedgerWriter, SnapshotStore, StateSnapshot};
use mmx_position::PositionState;
use mmx_risk::{
    CircuitBreaker, CircuitBreakerState, DailyLossGuard, HardStopLatch, HardStopReason,
    RiskAction, RiskManager, RiskState,
};
use mmx_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ControlConfig;

/// State shared between the control loop and the stream handlers.
#[derive(Clone)]
pub struct SharedState {
    pub market: Arc<MarketState>,
    pub position: Arc<PositionState>,
    pub orders: Arc<OrderManager>,
    pub gateway: DynOrderGateway,
    pub hard_stop: Arc<HardStopLatch>,
}

/// What a tick ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    HardStopped,
    MarketStale,
    ResyncFailed,
    BreakerPaused,
    BreakerTripped,
    PanicExit,
    Quoted,
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::HardStopped => "hard_stop",
            Self::MarketStale => "stale",
            Self::ResyncFailed => "resync_failed",
            Self::BreakerPaused => "paused",
            Self::BreakerTripped => "breaker",
            Self::PanicExit => "panic_exit",
            Self::Quoted => "traded",
        }
    }
}

pub struct ControlLoop {
    symbol: String,
    config: ControlConfig,
    shared: SharedState,
    risk: RiskManager,
    quotes: QuoteEngine,
    breaker: CircuitBreaker,
    daily_loss: DailyLossGuard,
    hedge_cooldown: HedgeCooldown,
    risk_state: RiskState,
    ledger_rx: mpsc::UnboundedReceiver<LedgerEvent>,
    ledger: Option<LedgerWriter>,
    snapshots: Option<SnapshotStore>,
    last_snapshot: Option<Instant>,
}

impl ControlLoop {
    pub fn new(
        config: ControlConfig,
        shared: SharedState,
        risk: RiskManager,
        quotes: QuoteEngine,
        ledger_rx: mpsc::UnboundedReceiver<LedgerEvent>,
    ) -> Self {
        let symbol = quotes.instrument().symbol.clone();
        let breaker = CircuitBreaker::new(risk.config().circuit_breaker.clone());
        let daily_loss = DailyLossGuard::new(risk.config().max_daily_loss);
        let hedge_cooldown =
            HedgeCooldown::new(Duration::from_secs(quotes.config().hedge_cooldown_secs));
        Self {
            symbol,
            config,
            shared,
            risk,
            quotes,
            breaker,
            daily_loss,
            hedge_cooldown,
            risk_state: RiskState::default(),
            ledger_rx,
            ledger: None,
            snapshots: None,
            last_snapshot: None,
        }
    }

    /// Attach the ledger writer and snapshot store.
    pub fn with_persistence(mut self, ledger: Option<LedgerWriter>, snapshots: Option<SnapshotStore>) -> Self {
        self.ledger = ledger;
        self.snapshots = snapshots;
        self
    }

    /// Resume persisted breaker and risk state.
    pub fn restore(&mut self, breaker: CircuitBreakerState, risk_state: RiskState) {
        self.breaker.restore(breaker);
        self.risk_state = risk_state;
    }

    pub fn risk_state(&self) -> &RiskState {
        &self.risk_state
    }

    pub fn breaker_state(&self) -> &CircuitBreakerState {
        self.breaker.state()
    }

    /// Run one tick.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let started = Instant::now();
        self.drain_ledger();

        let outcome = self.step(now).await;

        Metrics::hard_stop(self.shared.hard_stop.is_triggered());
        Metrics::working_orders(self.shared.orders.len());
        Metrics::tick(outcome.label(), started.elapsed().as_secs_f64() * 1000.0);
        debug!(outcome = outcome.label(), "Tick complete");

        if self.snapshot_due() {
            self.persist_snapshot();
        }
        outcome
    }

    async fn step(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.shared.hard_stop.is_triggered() {
            if self.risk_state.panic_exit_armed {
                self.retry_exit_under_hard_stop().await;
            }
            return TickOutcome::HardStopped;
        }

        let Some(snapshot) = self.fresh_snapshot() else {
            return TickOutcome::MarketStale;
        };
        Metrics::market_data_age(snapshot.age_ms().max(0) as f64);

        if let Err(e) = self.resync_if_stale().await {
            warn!(error = %e, "Resync failed, skipping tick");
            return TickOutcome::ResyncFailed;
        }

        let position = self.shared.position.snapshot();
        self.record_pnl(&position, &snapshot);

        if self.check_daily_loss(&position, &snapshot, now) {
            self.stop_trading().await;
            return TickOutcome::HardStopped;
        }

        // the breaker pause only suppresses quoting; stops still fire
        let evaluation = self.risk.evaluate(&self.risk_state, &position, &snapshot);
        self.risk_state = evaluation.state;
        let rebalance = match evaluation.action {
            RiskAction::PanicExit(order) => {
                self.panic_exit(order).await;
                return TickOutcome::PanicExit;
            }
            RiskAction::Rebalance(order) => Some(order),
            RiskAction::Hold => None,
        };

        if self.breaker.is_paused(now) {
            Metrics::circuit_breaker(true);
            return TickOutcome::BreakerPaused;
        }
        if self.breaker.record(now, snapshot.mid) {
            Metrics::circuit_breaker_tripped();
            let report = self.shared.orders.reconcile(&[], unix_ms()).await;
            self.record_report(&report);
            return TickOutcome::BreakerTripped;
        }
        Metrics::circuit_breaker(false);

        self.quote(&snapshot, &position, rebalance).await;
        TickOutcome::Quoted
    }

    /// Latest snapshot, `None` when the book is stale or incomplete.
    fn fresh_snapshot(&self) -> Option<MarketSnapshot> {
        if self.shared.market.is_stale(self.config.market_stale()) {
            debug!(age = ?self.shared.market.age(), "Market data stale, quoting paused");
            return None;
        }
        self.shared.market.snapshot()
    }

    async fn resync_if_stale(&self) -> ExecutorResult<()> {
        match self.check_account_fresh() {
            Ok(()) => Ok(()),
            Err(stale) => {
                info!(error = %stale, "Account view stale, resyncing");
                self.resync(stale.kind()).await
            }
        }
    }

    /// StaleState when the position or order view has gone unconfirmed
    /// for longer than the account window.
    pub fn check_account_fresh(&self) -> Result<(), ExchangeError> {
        let window = self.config.account_stale();
        let view = if self.shared.position.is_stale(window) {
            "position"
        } else if self.shared.orders.is_stale(window) {
            "orders"
        } else {
            return Ok(());
        };
        Err(ExchangeError::StaleState(format!(
            "{view} unconfirmed for over {}ms",
            window.as_millis()
        )))
    }

    /// Replace the local order and position view with the exchange's.
    pub async fn resync(&self, reason: &str) -> ExecutorResult<()> {
        let result = self.fetch_and_sync().await;
        match &result {
            Ok(open) => {
                Metrics::resync(reason);
                info!(reason, open, position = %self.shared.position.snapshot().qty, "Account state resynced");
            }
            Err(e) => self.on_executor_error(e),
        }
        result.map(|_| ())
    }

    async fn fetch_and_sync(&self) -> ExecutorResult<usize> {
        let open = self.shared.orders.resync_from_exchange().await?;
        match self.shared.gateway.position(self.symbol.clone()).await? {
            Some(exchange) => {
                self.shared.position.sync_from_exchange(&exchange);
            }
            None => {
                self.shared.position.sync_flat();
            }
        }
        Ok(open)
    }

    fn record_pnl(&self, position: &Position, snapshot: &MarketSnapshot) {
        let unrealized = position.unrealized_pnl(snapshot.mid);
        let daily = self.daily_loss.daily_pnl(position.realized_pnl, unrealized);
        Metrics::position(to_f64(position.qty));
        Metrics::pnl(to_f64(position.realized_pnl), to_f64(unrealized), to_f64(daily));
    }

    fn check_daily_loss(&mut self, position: &Position, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> bool {
        let unrealized = position.unrealized_pnl(snapshot.mid);
        if !self.daily_loss.check(position.realized_pnl, unrealized, now) {
            return false;
        }
        let pnl = self.daily_loss.daily_pnl(position.realized_pnl, unrealized);
        self.shared
            .hard_stop
            .trigger(HardStopReason::DailyLossLimit { pnl });
        true
    }

    /// Submit the exit, retrying with backoff inside the tick. Escalates to
    /// the hard stop when every attempt failed; the exit stays armed.
    async fn panic_exit(&mut self, order: OrderRequest) {
        Metrics::risk_action("panic_exit");
        let report = self.shared.orders.reconcile(&[], unix_ms()).await;
        self.record_report(&report);

        if self.shared.orders.has_exit() {
            debug!("Exit order already working, waiting for it");
            return;
        }
        if self.shared.orders.has_reduce_only() {
            warn!("Hedge or rebalance working at the stop, cancelling before exit");
            let report = self.shared.orders.cancel_reduce_only().await;
            self.record_report(&report);
        }

        let attempts = self.risk.config().panic_exit_attempts.max(1);
        let initial = Duration::from_millis(self.config.panic_exit_backoff_ms);
        let mut backoff = ExponentialBackoff::new(initial, initial.saturating_mul(16), 0.0);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let mut request = order.clone();
            request.cloid = ClientOrderId::new();
            match self.shared.orders.submit_reduce_only(request).await {
                Ok(ack) => {
                    Metrics::order_placed("exit");
                    warn!(order_id = %ack.order_id, qty = %order.qty, side = %order.side, attempt, "Panic exit submitted");
                    return;
                }
                Err(e) => {
                    self.on_executor_error(&e);
                    if e.is_auth() {
                        return;
                    }
                    warn!(attempt, attempts, error = %e, "Panic exit attempt failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
            }
        }

        error!(attempts, error = %last_error, "Panic exit failed, escalating");
        if !self.shared.hard_stop.is_triggered() {
            self.shared.hard_stop.trigger(HardStopReason::PanicExitFailed {
                attempts,
                error: last_error,
            });
        }
    }

    /// Keep trying to flatten an armed position after a hard stop.
    async fn retry_exit_under_hard_stop(&mut self) {
        if let Err(e) = self.resync_if_stale().await {
            warn!(error = %e, "Resync failed under hard stop");
            return;
        }
        let Some(snapshot) = self.shared.market.snapshot() else {
            return;
        };
        let position = self.shared.position.snapshot();
        let evaluation = self.risk.evaluate(&self.risk_state, &position, &snapshot);
        self.risk_state = evaluation.state;
        if let RiskAction::PanicExit(order) = evaluation.action {
            self.panic_exit(order).await;
        }
    }

    async fn quote(&mut self, snapshot: &MarketSnapshot, position: &Position, rebalance: Option<OrderRequest>) {
        let qcfg = self.quotes.config();
        let levels = Levels::from_candles(
            &self.shared.market.candles(),
            qcfg.pivot_left,
            qcfg.pivot_right,
            qcfg.max_zones,
        );
        let instructions = self.quotes.compute_quotes(snapshot, position, &levels);
        Metrics::spread(to_f64(self.quotes.spread_bps(snapshot)));

        let targets: Vec<QuoteTarget> = instructions
            .iter()
            .filter(|i| i.is_quote())
            .filter_map(|i| {
                i.price.map(|price| QuoteTarget {
                    role: i.role,
                    side: i.side,
                    price,
                    qty: i.qty,
                })
            })
            .collect();

        let report = self.shared.orders.reconcile(&targets, unix_ms()).await;
        self.record_report(&report);
        if self.shared.hard_stop.is_triggered() {
            return;
        }

        if self.shared.orders.has_reduce_only() {
            return;
        }
        if let Some(order) = rebalance {
            self.submit_reduce_only(order, "rebalance").await;
            return;
        }
        let hedge = instructions.iter().find(|i| !i.is_quote() && i.reduce_only);
        if let Some(hedge) = hedge {
            if self.hedge_cooldown.try_acquire(Instant::now()) {
                self.submit_reduce_only(hedge.to_request(&self.symbol), "hedge").await;
            } else {
                debug!(remaining = ?self.hedge_cooldown.remaining(Instant::now()), "Hedge cooling down");
            }
        }
    }

    async fn submit_reduce_only(&self, order: OrderRequest, action: &'static str) {
        Metrics::risk_action(action);
        let role = order.role.to_string();
        match self.shared.orders.submit_reduce_only(order).await {
            Ok(_) => Metrics::order_placed(&role),
            Err(e) => {
                warn!(action, error = %e, "Reduce-only order not placed");
                self.on_executor_error(&e);
            }
        }
    }

    fn record_report(&self, report: &ReconcileReport) {
        if report.placed > 0 {
            Metrics::orders_placed("quote", report.placed);
        }
        if report.cancelled > 0 {
            Metrics::orders_cancelled("reconcile", report.cancelled);
        }
        for err in &report.errors {
            self.on_exchange_error(err);
        }
        if report.rejected > 0 {
            let kind = report.errors.first().map_or("unknown", ExchangeError::kind);
            Metrics::orders_rejected(kind, report.rejected);
        }
    }

    fn on_executor_error(&self, err: &ExecutorError) {
        if let ExecutorError::Exchange(e) = err {
            self.on_exchange_error(e);
        }
    }

    /// Count the error; credentials rejected means stop trading.
    fn on_exchange_error(&self, err: &ExchangeError) {
        Metrics::api_error(err.kind());
        if err.is_auth() && !self.shared.hard_stop.is_triggered() {
            self.shared.hard_stop.trigger(HardStopReason::AuthFailure {
                message: err.to_string(),
            });
        }
    }

    /// Cancel every working order and clear the stop bookkeeping.
    pub async fn stop_trading(&mut self) {
        let working = self.shared.orders.len();
        match self.shared.orders.cancel_all().await {
            Ok(()) => Metrics::orders_cancelled("stop", working),
            Err(e) => {
                error!(error = %e, "Cancel all failed");
                self.on_executor_error(&e);
            }
        }
        if !self.risk_state.panic_exit_armed {
            self.risk_state = RiskState::default();
        }
        Metrics::working_orders(self.shared.orders.len());
    }

    fn drain_ledger(&mut self) {
        while let Ok(event) = self.ledger_rx.try_recv() {
            let Some(ledger) = self.ledger.as_mut() else {
                continue;
            };
            if let Err(e) = ledger.append(event) {
                warn!(error = %e, "Ledger append failed");
            }
        }
    }

    fn snapshot_due(&self) -> bool {
        self.snapshots.is_some()
            && self
                .last_snapshot
                .map_or(true, |t| t.elapsed() >= self.config.snapshot_interval())
    }

    /// Write the state snapshot now.
    pub fn persist_snapshot(&mut self) {
        let Some(store) = self.snapshots.as_ref() else {
            return;
        };
        let snapshot = StateSnapshot::new(
            &self.symbol,
            self.shared.orders.snapshot(),
            self.shared.position.snapshot(),
            self.risk_state.clone(),
            self.breaker.state().clone(),
        );
        match store.save(&snapshot) {
            Ok(()) => debug!(orders = snapshot.orders.len(), "State snapshot saved"),
            Err(e) => warn!(error = %e, "State snapshot failed"),
        }
        self.last_snapshot = Some(Instant::now());
    }

    /// Stop trading and persist state, then run `teardown` for the
    /// streams and handlers.
    pub async fn wind_down<F>(&mut self, teardown: F)
    where
        F: Future<Output = ()>,
    {
        self.stop_trading().await;
        self.finish();
        teardown.await;
    }

    /// Flush the ledger and write a final snapshot.
    pub fn finish(&mut self) {
        self.drain_ledger();
        self.persist_snapshot();
        if let Some(ledger) = self.ledger.as_mut() {
            if let Err(e) = ledger.close() {
                warn!(error = %e, "Ledger close failed");
            }
        }
        info!("Control loop finished");
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmx_core::{ExchangePosition, InstrumentSpec, OrderSide, Price, QuoteRole, Size};
    use mmx_exchange::MockOrderGateway;
    use mmx_executor::ReconcileConfig;
    use mmx_feed::{BookSide, MarketStateConfig};
    use mmx_mm::QuoteConfig;
    use mmx_risk::RiskConfig;
    use rust_decimal_macros::dec;

    struct Harness {
        control: ControlLoop,
        gateway: Arc<MockOrderGateway>,
        shared: SharedState,
        ledger_tx: mpsc::UnboundedSender<LedgerEvent>,
    }

    fn instrument() -> InstrumentSpec {
        InstrumentSpec {
            symbol: "BTCUSDT".to_string(),
            tick_size: Price::new(dec!(0.01)),
            qty_step: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(10)),
        }
    }

    fn harness_with(risk: RiskConfig) -> Harness {
        let gateway = Arc::new(MockOrderGateway::new());
        let dyn_gateway: DynOrderGateway = gateway.clone();
        let shared = SharedState {
            market: Arc::new(MarketState::new(MarketStateConfig::default())),
            position: Arc::new(PositionState::new("BTCUSDT")),
            orders: Arc::new(OrderManager::new(
                "BTCUSDT",
                ReconcileConfig::default(),
                dyn_gateway.clone(),
            )),
            gateway: dyn_gateway,
            hard_stop: Arc::new(HardStopLatch::new()),
        };
        let config = ControlConfig {
            panic_exit_backoff_ms: 1,
            ..ControlConfig::default()
        };
        let max = Size::new(risk.max_position);
        let (ledger_tx, ledger_rx) = mpsc::unbounded_channel();
        let control = ControlLoop::new(
            config,
            shared.clone(),
            RiskManager::new(risk, instrument()),
            QuoteEngine::new(QuoteConfig::default(), instrument(), max),
            ledger_rx,
        );
        Harness {
            control,
            gateway,
            shared,
            ledger_tx,
        }
    }

    fn harness() -> Harness {
        harness_with(RiskConfig::default())
    }

    fn set_book(shared: &SharedState, bid: Decimal, ask: Decimal) {
        shared.market.update_book(
            Some(BookSide {
                price: Price::new(bid),
                size: Size::new(dec!(1)),
            }),
            Some(BookSide {
                price: Price::new(ask),
                size: Size::new(dec!(1)),
            }),
        );
    }

    fn long(qty: Decimal, entry: Decimal) -> ExchangePosition {
        ExchangePosition {
            symbol: "BTCUSDT".to_string(),
            qty,
            avg_entry: Price::new(entry),
            unrealized_pnl: Decimal::ZERO,
            cum_realized_pnl: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_tick_places_both_quotes() {
        let mut h = harness();
        set_book(&h.shared, dec!(99.99), dec!(100.01));

        let outcome = h.control.tick(Utc::now()).await;

        assert_eq!(outcome, TickOutcome::Quoted);
        let placed = h.gateway.placed();
        assert_eq!(placed.len(), 2);
        let bid = placed.iter().find(|o| o.role == QuoteRole::Bid).unwrap();
        let ask = placed.iter().find(|o| o.role == QuoteRole::Ask).unwrap();
        assert!(bid.price.unwrap() < ask.price.unwrap());
        assert_eq!(h.shared.orders.len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_market_keeps_quotes() {
        let mut h = harness();
        set_book(&h.shared, dec!(99.99), dec!(100.01));
        h.control.tick(Utc::now()).await;
        h.gateway.clear();

        h.control.tick(Utc::now()).await;

        assert!(h.gateway.placed().is_empty());
        assert!(h.gateway.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_no_book_pauses_without_touching_orders() {
        let mut h = harness();

        let outcome = h.control.tick(Utc::now()).await;

        assert_eq!(outcome, TickOutcome::MarketStale);
        assert!(h.gateway.placed().is_empty());
        assert_eq!(h.gateway.cancel_all_calls(), 0);
    }

    #[tokio::test]
    async fn test_first_tick_resyncs_position_from_exchange() {
        let mut h = harness();
        h.gateway.set_position(Some(long(dec!(0.2), dec!(100))));
        set_book(&h.shared, dec!(99.99), dec!(100.01));

        h.control.tick(Utc::now()).await;

        assert_eq!(h.shared.position.snapshot().qty, dec!(0.2));
        assert_eq!(h.control.risk_state().side, Some(OrderSide::Buy));
    }

    #[tokio::test]
    async fn test_breaker_trip_cancels_quotes_and_pauses() {
        let mut h = harness();
        let t0 = Utc::now();
        set_book(&h.shared, dec!(99.99), dec!(100.01));
        h.control.tick(t0).await;
        assert_eq!(h.shared.orders.len(), 2);

        set_book(&h.shared, dec!(104.99), dec!(105.01));
        let outcome = h.control.tick(t0 + chrono::Duration::seconds(1)).await;
        assert_eq!(outcome, TickOutcome::BreakerTripped);
        assert_eq!(h.gateway.cancelled().len(), 2);

        h.gateway.clear();
        let outcome = h.control.tick(t0 + chrono::Duration::seconds(2)).await;
        assert_eq!(outcome, TickOutcome::BreakerPaused);
        assert!(h.gateway.placed().is_empty());
        assert!(h.control.breaker_state().tripped);
    }

    /// Long 0.2 @ 100 with the trailing stop set at 99, quotes cleared.
    async fn armed_long() -> Harness {
        let mut h = harness();
        h.gateway.set_position(Some(long(dec!(0.2), dec!(100))));
        set_book(&h.shared, dec!(99.99), dec!(100.01));
        h.control.tick(Utc::now()).await;
        assert_eq!(h.control.risk_state().trailing_stop, Some(Price::new(dec!(99))));
        h.gateway.clear();
        h
    }

    #[tokio::test]
    async fn test_unconfirmed_view_is_stale_until_resync() {
        let mut h = harness();
        let stale = h.control.check_account_fresh().unwrap_err();
        assert!(matches!(stale, ExchangeError::StaleState(ref m) if m.starts_with("position")));
        assert_eq!(stale.kind(), "stale_state");
        assert!(!stale.is_retryable());

        set_book(&h.shared, dec!(99.99), dec!(100.01));
        h.control.tick(Utc::now()).await;
        assert!(h.control.check_account_fresh().is_ok());
    }

    #[tokio::test]
    async fn test_stop_cross_submits_exit() {
        let mut h = armed_long().await;
        set_book(&h.shared, dec!(98.49), dec!(98.51));

        let outcome = h.control.tick(Utc::now()).await;

        assert_eq!(outcome, TickOutcome::PanicExit);
        assert_eq!(h.gateway.cancelled().len(), 2);
        let placed = h.gateway.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].role, QuoteRole::Exit);
        assert_eq!(placed[0].side, OrderSide::Sell);
        assert!(placed[0].reduce_only);
        assert_eq!(placed[0].qty, Size::new(dec!(0.2)));
        assert!(h.control.risk_state().panic_exit_armed);
        assert!(!h.shared.hard_stop.is_triggered());
    }

    #[tokio::test]
    async fn test_stop_cross_exits_during_breaker_pause() {
        let mut h = armed_long().await;
        let t0 = Utc::now();

        // +3% trips the breaker and trails the stop up to 102
        set_book(&h.shared, dec!(102.99), dec!(103.01));
        let outcome = h.control.tick(t0).await;
        assert_eq!(outcome, TickOutcome::BreakerTripped);
        assert_eq!(h.control.risk_state().trailing_stop, Some(Price::new(dec!(102))));
        h.gateway.clear();

        set_book(&h.shared, dec!(99.99), dec!(100.01));
        let outcome = h.control.tick(t0 + chrono::Duration::seconds(1)).await;

        assert_eq!(outcome, TickOutcome::PanicExit);
        let placed = h.gateway.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].role, QuoteRole::Exit);
        assert_eq!(placed[0].qty, Size::new(dec!(0.2)));
        assert!(h.control.risk_state().panic_exit_armed);
        assert!(h.control.breaker_state().tripped);
    }

    #[tokio::test]
    async fn test_stop_cross_cancels_working_hedge() {
        let mut h = armed_long().await;
        let hedge = OrderRequest::reduce_only_limit(
            "BTCUSDT",
            QuoteRole::Hedge,
            OrderSide::Sell,
            Price::new(dec!(100.5)),
            Size::new(dec!(0.1)),
        );
        let hedge_cloid = hedge.cloid.clone();
        h.shared.orders.submit_reduce_only(hedge).await.unwrap();
        h.gateway.clear();
        set_book(&h.shared, dec!(98.49), dec!(98.51));

        let outcome = h.control.tick(Utc::now()).await;

        assert_eq!(outcome, TickOutcome::PanicExit);
        assert!(h.gateway.cancelled().iter().any(|c| c.cloid == hedge_cloid));
        let placed = h.gateway.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].role, QuoteRole::Exit);
        assert_eq!(placed[0].qty, Size::new(dec!(0.2)));
        assert!(h.shared.orders.has_exit());
        assert!(!h.shared.orders.snapshot().iter().any(|o| o.role == QuoteRole::Hedge));
    }

    #[tokio::test]
    async fn test_exit_retried_within_tick() {
        let mut h = armed_long().await;
        h.gateway.fail_next_place_orders(2);
        set_book(&h.shared, dec!(98.49), dec!(98.51));

        let outcome = h.control.tick(Utc::now()).await;

        assert_eq!(outcome, TickOutcome::PanicExit);
        assert_eq!(h.gateway.placed().len(), 1);
        assert!(!h.shared.hard_stop.is_triggered());
    }

    #[tokio::test]
    async fn test_exit_failure_escalates_and_stays_armed() {
        let mut h = armed_long().await;
        h.gateway.fail_next_place_orders(3);
        set_book(&h.shared, dec!(98.49), dec!(98.51));

        h.control.tick(Utc::now()).await;

        assert!(h.gateway.placed().is_empty());
        assert!(matches!(
            h.shared.hard_stop.reason(),
            Some(HardStopReason::PanicExitFailed { attempts: 3, .. })
        ));
        assert!(h.control.risk_state().panic_exit_armed);

        // the exit is still attempted under the hard stop
        let outcome = h.control.tick(Utc::now()).await;
        assert_eq!(outcome, TickOutcome::HardStopped);
        let placed = h.gateway.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].role, QuoteRole::Exit);
    }

    #[tokio::test]
    async fn test_hard_stop_skips_quoting() {
        let mut h = harness();
        set_book(&h.shared, dec!(99.99), dec!(100.01));
        h.shared.hard_stop.trigger(HardStopReason::Manual {
            message: "test".into(),
        });

        let outcome = h.control.tick(Utc::now()).await;

        assert_eq!(outcome, TickOutcome::HardStopped);
        assert!(h.gateway.placed().is_empty());
    }

    #[tokio::test]
    async fn test_auth_rejection_triggers_hard_stop() {
        let mut h = harness();
        set_book(&h.shared, dec!(99.99), dec!(100.01));
        h.gateway.set_place_error(Some(ExchangeError::Auth {
            code: 10003,
            message: "invalid api key".into(),
        }));

        h.control.tick(Utc::now()).await;

        assert!(matches!(
            h.shared.hard_stop.reason(),
            Some(HardStopReason::AuthFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_hedge_respects_cooldown() {
        let mut h = harness();
        h.gateway.set_position(Some(long(dec!(0.6), dec!(100))));
        set_book(&h.shared, dec!(99.99), dec!(100.01));

        h.control.tick(Utc::now()).await;
        let hedges: Vec<_> = h
            .gateway
            .placed()
            .into_iter()
            .filter(|o| o.role == QuoteRole::Hedge)
            .collect();
        assert_eq!(hedges.len(), 1);
        assert_eq!(hedges[0].side, OrderSide::Sell);
        assert_eq!(hedges[0].qty, Size::new(dec!(0.3)));

        // the hedge filled; the next one waits for the cooldown
        h.shared.orders.resync(Vec::new());
        h.gateway.clear();
        h.control.tick(Utc::now()).await;
        assert!(h.gateway.placed().iter().all(|o| o.role != QuoteRole::Hedge));
    }

    #[tokio::test]
    async fn test_rebalance_above_threshold() {
        let mut h = harness();
        h.gateway.set_position(Some(long(dec!(0.9), dec!(100))));
        set_book(&h.shared, dec!(99.99), dec!(100.01));

        h.control.tick(Utc::now()).await;

        let placed = h.gateway.placed();
        let rebalance: Vec<_> = placed
            .iter()
            .filter(|o| o.role == QuoteRole::Rebalance)
            .collect();
        assert_eq!(rebalance.len(), 1);
        assert_eq!(rebalance[0].qty, Size::new(dec!(0.1)));
        assert!(placed.iter().all(|o| o.role != QuoteRole::Hedge));
    }

    #[tokio::test]
    async fn test_daily_loss_limit_stops_trading() {
        let risk = RiskConfig {
            max_daily_loss: dec!(1),
            ..RiskConfig::default()
        };
        let mut h = harness_with(risk);
        h.gateway.set_position(Some(long(dec!(0.5), dec!(100))));
        set_book(&h.shared, dec!(97.99), dec!(98.01));

        let outcome = h.control.tick(Utc::now()).await;

        assert_eq!(outcome, TickOutcome::HardStopped);
        assert!(matches!(
            h.shared.hard_stop.reason(),
            Some(HardStopReason::DailyLossLimit { .. })
        ));
        assert_eq!(h.gateway.cancel_all_calls(), 1);
    }

    #[tokio::test]
    async fn test_finish_writes_snapshot_and_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let ledger = LedgerWriter::new(dir.path().join("ledger"), 8).unwrap();
        let mut h = harness();
        h.control = h.control.with_persistence(Some(ledger), Some(store.clone()));
        set_book(&h.shared, dec!(99.99), dec!(100.01));
        h.control.tick(Utc::now()).await;

        h.ledger_tx
            .send(LedgerEvent::Balance {
                total_equity: dec!(1000),
                wallet_balance: dec!(1000),
                available_balance: dec!(900),
            })
            .unwrap();
        h.control.finish();

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.symbol, "BTCUSDT");
        assert_eq!(saved.orders.len(), 2);
        let records = mmx_persistence::read_records(&dir.path().join("ledger")).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_wind_down_persists_before_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let mut h = harness();
        h.control = h.control.with_persistence(None, Some(store.clone()));
        set_book(&h.shared, dec!(99.99), dec!(100.01));
        h.control.tick(Utc::now()).await;
        let gateway = h.gateway.clone();

        let mut torn_down = false;
        h.control
            .wind_down(async {
                assert_eq!(gateway.cancel_all_calls(), 1);
                let saved = store.load().unwrap().unwrap();
                assert!(saved.orders.is_empty());
                torn_down = true;
            })
            .await;

        assert!(torn_down);
    }
}
