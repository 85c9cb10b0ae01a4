//! Main application orchestration.
//!
//! Startup: instrument metadata, leverage, wallet, persisted state, candle
//! history, then a full resync before the first quote. Runtime: public and
//! private streams feed their handlers while the control loop ticks.
//! Shutdown cancels every order before the streams close.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mmx_core::InstrumentSpec;
use mmx_exchange::{DynOrderGateway, ExchangeClient};
use mmx_executor::OrderManager;
use mmx_feed::MarketState;
use mmx_mm::QuoteEngine;
use mmx_persistence::{LedgerWriter, SnapshotStore};
use mmx_position::PositionState;
use mmx_risk::{HardStopLatch, RiskManager};
use mmx_telemetry::Metrics;
use mmx_ws::{ConnectionState, StreamManager};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::control_loop::{ControlLoop, SharedState};
use crate::error::{AppError, AppResult};
use crate::handlers::{AccountHandler, MarketHandler};

/// Main application.
pub struct Application {
    config: AppConfig,
    client: Arc<ExchangeClient>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the REST client. Trading needs credentials, so their absence is
    /// a startup error.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let credentials = config.exchange.credentials().ok_or_else(|| {
            AppError::Startup(
                "API credentials missing: set MMX__EXCHANGE__API_KEY and MMX__EXCHANGE__API_SECRET"
                    .to_string(),
            )
        })?;
        let client = Arc::new(ExchangeClient::new(
            config.exchange.client_config(),
            credentials,
        )?);
        Ok(Self {
            config,
            client,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops `run` when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Instrument rules and leverage.
    async fn preflight(&self) -> AppResult<InstrumentSpec> {
        let symbol = &self.config.instrument.symbol;
        let instrument = self.client.get_instrument(symbol).await?;
        instrument.validate()?;
        info!(
            symbol = %symbol,
            tick_size = %instrument.tick_size,
            qty_step = %instrument.qty_step,
            min_qty = %instrument.min_qty,
            max_qty = %instrument.max_qty,
            "Instrument loaded"
        );

        if self.config.instrument.leverage > 0 {
            self.client
                .set_leverage(symbol, self.config.instrument.leverage)
                .await?;
        }
        Ok(instrument)
    }

    pub async fn run(self) -> AppResult<()> {
        let symbol = self.config.instrument.symbol.clone();
        info!(symbol = %symbol, testnet = self.config.exchange.testnet, "Starting market maker");

        let instrument = self.preflight().await?;

        let gateway: DynOrderGateway = self.client.clone();
        let shared = SharedState {
            market: Arc::new(MarketState::new(self.config.market.clone())),
            position: Arc::new(PositionState::new(symbol.as_str())),
            orders: Arc::new(OrderManager::new(
                symbol.as_str(),
                self.config.reconcile.clone(),
                gateway.clone(),
            )),
            gateway,
            hard_stop: Arc::new(HardStopLatch::new()),
        };

        match self.client.get_wallet_balance().await {
            Ok(balance) => {
                info!(
                    equity = %balance.total_equity,
                    available = %balance.available_balance,
                    "Wallet balance"
                );
                shared.position.update_equity(balance.total_equity);
            }
            Err(e) => warn!(error = %e, "Wallet balance unavailable"),
        }

        let risk = RiskManager::new(self.config.risk.clone(), instrument.clone());
        let quotes = QuoteEngine::new(self.config.quote.clone(), instrument, risk.max_position());

        let persistence = &self.config.persistence;
        let store = SnapshotStore::new(&persistence.snapshot_path);
        let ledger = LedgerWriter::new(&persistence.ledger_dir, persistence.ledger_buffer)?;
        let (ledger_tx, ledger_rx) = mpsc::unbounded_channel();
        let mut control = ControlLoop::new(
            self.config.control.clone(),
            shared.clone(),
            risk,
            quotes,
            ledger_rx,
        )
        .with_persistence(Some(ledger), Some(store.clone()));

        self.restore(&store, &shared, &mut control);
        self.prime_candles(&shared.market).await;
        control.resync("startup").await?;

        let capacity = self.config.websocket.queue_capacity;
        let (market_tx, market_rx) = mpsc::channel(capacity);
        let (account_tx, account_rx) = mpsc::channel(capacity);
        let mut streams = StreamManager::new(
            self.config.stream_config(),
            self.config.exchange.credentials(),
            market_tx,
            account_tx,
            &self.shutdown,
        );
        streams.spawn();

        let market_task = tokio::spawn(
            MarketHandler::new(&symbol, shared.market.clone()).run(market_rx),
        );
        let account_task = tokio::spawn(
            AccountHandler::new(
                &symbol,
                shared.position.clone(),
                shared.orders.clone(),
                ledger_tx,
            )
            .run(account_rx),
        );

        info!("Entering main loop");
        let mut ticker = tokio::time::interval(self.config.control.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut metrics_interval = tokio::time::interval(Duration::from_secs(
            self.config.telemetry.metrics_interval_secs.max(1),
        ));
        metrics_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stream_states = StreamStates::default();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    stream_states.observe(&streams);
                    control.tick(Utc::now()).await;
                }

                _ = metrics_interval.tick() => {
                    self.write_metrics();
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        info!("Shutting down");
        control
            .wind_down(async move {
                streams.shutdown().await;
                // last senders live in the connections
                drop(streams);
                for (handler, task) in [("market", market_task), ("account", account_task)] {
                    if let Err(e) = task.await {
                        error!(handler, error = %e, "Handler task panicked");
                    }
                }
            })
            .await;
        self.write_metrics();
        Ok(())
    }

    /// Load the persisted snapshot for this symbol. Orders and position stay
    /// unconfirmed until the startup resync.
    fn restore(&self, store: &SnapshotStore, shared: &SharedState, control: &mut ControlLoop) {
        match store.load() {
            Ok(Some(snapshot)) if snapshot.symbol == self.config.instrument.symbol => {
                info!(
                    saved_at = %snapshot.saved_at,
                    orders = snapshot.orders.len(),
                    position = %snapshot.position.qty,
                    "Restoring state snapshot"
                );
                shared.orders.restore(snapshot.orders);
                shared.position.restore(snapshot.position);
                control.restore(snapshot.circuit_breaker, snapshot.risk_state);
            }
            Ok(Some(snapshot)) => {
                warn!(symbol = %snapshot.symbol, "Snapshot belongs to another symbol, ignored");
            }
            Ok(None) => info!("No state snapshot, starting fresh"),
            Err(e) => warn!(error = %e, "State snapshot unreadable, starting fresh"),
        }
    }

    /// Seed candles so levels and volatility are usable from the first tick.
    async fn prime_candles(&self, market: &MarketState) {
        let cfg = &self.config.instrument;
        if cfg.kline_history == 0 {
            return;
        }
        match self
            .client
            .get_klines(&cfg.symbol, &cfg.kline_interval, cfg.kline_history)
            .await
        {
            Ok(candles) => {
                info!(count = candles.len(), "Candle history loaded");
                market.prime_candles(&candles);
            }
            Err(e) => warn!(error = %e, "Candle history unavailable"),
        }
    }

    /// Write the Prometheus text to the configured file.
    fn write_metrics(&self) {
        let Some(path) = self.config.telemetry.metrics_file.as_deref() else {
            return;
        };
        let text = match Metrics::gather_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Metrics gather failed");
                return;
            }
        };
        if let Err(e) = write_atomic(Path::new(path), text.as_bytes()) {
            warn!(path, error = %e, "Metrics file write failed");
        }
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Last observed connection states, sampled each tick.
#[derive(Debug, Default)]
struct StreamStates {
    public: Option<ConnectionState>,
    private: Option<ConnectionState>,
}

impl StreamStates {
    fn observe(&mut self, streams: &StreamManager) {
        observe_stream("public", &mut self.public, Some(streams.public_state()));
        observe_stream("private", &mut self.private, streams.private_state());
        Metrics::ws_dropped(streams.dropped_messages());
    }
}

fn observe_stream(stream: &str, last: &mut Option<ConnectionState>, current: Option<ConnectionState>) {
    let Some(current) = current else {
        return;
    };
    if *last == Some(current) {
        return;
    }
    if current == ConnectionState::Reconnecting {
        Metrics::ws_reconnect(stream);
    }
    info!(stream, state = state_label(current), "Stream state changed");
    Metrics::ws_state_set(stream, state_label(current));
    *last = Some(current);
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Subscribed => "subscribed",
        ConnectionState::Streaming => "streaming",
        ConnectionState::Reconnecting => "reconnecting",
    }
}
