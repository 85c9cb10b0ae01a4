//! Application configuration.
//!
//! Loaded once at startup from a TOML file, then overridden by `MMX__`
//! environment variables (`MMX__EXCHANGE__API_KEY`, `MMX__RISK__MAX_POSITION`,
//! ...). The validated struct is never mutated afterwards.

use std::fmt;
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use mmx_exchange::{ClientConfig, Credentials, RetryPolicy};
use mmx_executor::ReconcileConfig;
use mmx_feed::MarketStateConfig;
use mmx_mm::QuoteConfig;
use mmx_risk::RiskConfig;
use mmx_ws::{ConnectionConfig, StreamConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MMX";

const MAINNET_REST: &str = "https://api.bybit.com";
const TESTNET_REST: &str = "https://api-testnet.bybit.com";
const MAINNET_PUBLIC_WS: &str = "wss://stream.bybit.com/v5/public/linear";
const TESTNET_PUBLIC_WS: &str = "wss://stream-testnet.bybit.com/v5/public/linear";
const MAINNET_PRIVATE_WS: &str = "wss://stream.bybit.com/v5/private";
const TESTNET_PRIVATE_WS: &str = "wss://stream-testnet.bybit.com/v5/private";

/// Exchange endpoints, credentials and REST client limits.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Use the testnet endpoints unless an explicit URL is set.
    #[serde(default = "default_true")]
    pub testnet: bool,
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub public_ws_url: Option<String>,
    #[serde(default)]
    pub private_ws_url: Option<String>,
    /// Set via `MMX__EXCHANGE__API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Set via `MMX__EXCHANGE__API_SECRET`.
    #[serde(default, skip_serializing)]
    pub api_secret: Option<String>,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    /// Items per batch order request.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Total attempts per REST call, first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_recv_window_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_rate_limit_requests() -> u32 {
    10
}

fn default_rate_limit_window_ms() -> u64 {
    1000
}

fn default_batch_limit() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_initial_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    10_000
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            testnet: true,
            rest_url: None,
            public_ws_url: None,
            private_ws_url: None,
            api_key: None,
            api_secret: None,
            recv_window_ms: default_recv_window_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            batch_limit: default_batch_limit(),
            max_attempts: default_max_attempts(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("testnet", &self.testnet)
            .field("rest_url", &self.rest_url())
            .field("public_ws_url", &self.public_ws_url())
            .field("private_ws_url", &self.private_ws_url())
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("recv_window_ms", &self.recv_window_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("rate_limit_requests", &self.rate_limit_requests)
            .field("rate_limit_window_ms", &self.rate_limit_window_ms)
            .field("batch_limit", &self.batch_limit)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl ExchangeConfig {
    pub fn rest_url(&self) -> &str {
        match &self.rest_url {
            Some(url) => url,
            None if self.testnet => TESTNET_REST,
            None => MAINNET_REST,
        }
    }

    pub fn public_ws_url(&self) -> &str {
        match &self.public_ws_url {
            Some(url) => url,
            None if self.testnet => TESTNET_PUBLIC_WS,
            None => MAINNET_PUBLIC_WS,
        }
    }

    pub fn private_ws_url(&self) -> &str {
        match &self.private_ws_url {
            Some(url) => url,
            None if self.testnet => TESTNET_PRIVATE_WS,
            None => MAINNET_PRIVATE_WS,
        }
    }

    /// Both key and secret, or `None`.
    pub fn credentials(&self) -> Option<Credentials> {
        let creds = Credentials::new(
            self.api_key.clone().unwrap_or_default(),
            self.api_secret.clone().unwrap_or_default(),
        );
        creds.is_configured().then_some(creds)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.rest_url().to_string(),
            recv_window_ms: self.recv_window_ms,
            timeout: Duration::from_millis(self.request_timeout_ms),
            rate_limit_requests: self.rate_limit_requests,
            rate_limit_window: Duration::from_millis(self.rate_limit_window_ms),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_delay: Duration::from_millis(self.retry_initial_ms),
                max_delay: Duration::from_millis(self.retry_max_ms),
                ..RetryPolicy::default()
            },
            batch_limit: self.batch_limit,
            ..ClientConfig::default()
        }
    }
}

/// Traded instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Leverage set at startup. Zero leaves the account setting alone.
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Kline interval in minutes, as the exchange names it.
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,
    /// Closed candles fetched at startup.
    #[serde(default = "default_kline_history")]
    pub kline_history: u32,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_leverage() -> u32 {
    5
}

fn default_kline_interval() -> String {
    "1".to_string()
}

fn default_kline_history() -> u32 {
    200
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            leverage: default_leverage(),
            kline_interval: default_kline_interval(),
            kline_history: default_kline_history(),
        }
    }
}

/// Stream connection settings shared by both connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Backoff resets after a connection stayed up this long.
    pub healthy_reset_ms: u64,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub message_timeout_ms: u64,
    /// Limit for the handshake and each outbound frame.
    pub connect_timeout_ms: u64,
    /// Capacity of each handler queue.
    pub queue_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 0,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            healthy_reset_ms: 60_000,
            ping_interval_ms: 20_000,
            pong_timeout_ms: 10_000,
            message_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
            queue_capacity: 1024,
        }
    }
}

impl From<WsConfig> for ConnectionConfig {
    fn from(cfg: WsConfig) -> Self {
        Self {
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_initial_ms: cfg.reconnect_initial_ms,
            reconnect_max_ms: cfg.reconnect_max_ms,
            healthy_reset_ms: cfg.healthy_reset_ms,
            ping_interval_ms: cfg.ping_interval_ms,
            pong_timeout_ms: cfg.pong_timeout_ms,
            message_timeout_ms: cfg.message_timeout_ms,
            connect_timeout_ms: cfg.connect_timeout_ms,
            ..ConnectionConfig::default()
        }
    }
}

/// Control loop cadence and staleness windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Market data older than this pauses quoting.
    #[serde(default = "default_market_stale_ms")]
    pub market_stale_ms: u64,
    /// Position or order view older than this forces a REST resync.
    #[serde(default = "default_account_stale_ms")]
    pub account_stale_ms: u64,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    /// First delay between panic exit attempts; doubles per attempt.
    #[serde(default = "default_panic_exit_backoff_ms")]
    pub panic_exit_backoff_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_market_stale_ms() -> u64 {
    5000
}

fn default_account_stale_ms() -> u64 {
    30_000
}

fn default_snapshot_interval_secs() -> u64 {
    30
}

fn default_panic_exit_backoff_ms() -> u64 {
    200
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            market_stale_ms: default_market_stale_ms(),
            account_stale_ms: default_account_stale_ms(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            panic_exit_backoff_ms: default_panic_exit_backoff_ms(),
        }
    }
}

impl ControlConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn market_stale(&self) -> Duration {
        Duration::from_millis(self.market_stale_ms)
    }

    pub fn account_stale(&self) -> Duration {
        Duration::from_millis(self.account_stale_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub snapshot_path: String,
    /// Directory of the daily ledger files.
    pub ledger_dir: String,
    /// Ledger records buffered before a flush.
    pub ledger_buffer: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: "./data/state.json".to_string(),
            ledger_dir: "./data/ledger".to_string(),
            ledger_buffer: 32,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus text file rewritten periodically. Unset disables it.
    #[serde(default)]
    pub metrics_file: Option<String>,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    15
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_file: None,
            metrics_interval_secs: default_metrics_interval_secs(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub instrument: InstrumentConfig,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub market: MarketStateConfig,
    #[serde(default)]
    pub quote: QuoteConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load a TOML file, apply `MMX__` overrides and validate.
    pub fn load(path: &str) -> AppResult<Self> {
        let settings = Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::finish(settings)
    }

    /// Parse and validate TOML text without environment overrides.
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Self::finish(settings)
    }

    fn finish(settings: Config) -> AppResult<Self> {
        let mut config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent values. Clamps the rebalance threshold to the
    /// max position.
    pub fn validate(&mut self) -> AppResult<()> {
        if self.instrument.symbol.trim().is_empty() {
            return Err(AppError::Config("instrument.symbol must be set".into()));
        }
        self.quote.validate()?;
        self.risk.validate()?;

        if self.quote.max_order_size > self.risk.max_position {
            return Err(AppError::Config(
                "quote.max_order_size must not exceed risk.max_position".into(),
            ));
        }
        if self.reconcile.max_orders_per_side == 0 {
            return Err(AppError::Config(
                "reconcile.max_orders_per_side must be at least 1".into(),
            ));
        }
        if self.reconcile.price_deviation_pct <= Decimal::ZERO {
            return Err(AppError::Config(
                "reconcile.price_deviation_pct must be positive".into(),
            ));
        }
        if self.market.ema_alpha <= Decimal::ZERO || self.market.ema_alpha > Decimal::ONE {
            return Err(AppError::Config("market.ema_alpha must be in (0, 1]".into()));
        }
        if self.market.atr_period == 0 {
            return Err(AppError::Config("market.atr_period must be at least 1".into()));
        }

        let minutes: u64 = self.instrument.kline_interval.parse().map_err(|_| {
            AppError::Config(format!(
                "instrument.kline_interval must be a number of minutes, got {}",
                self.instrument.kline_interval
            ))
        })?;
        if minutes == 0 || minutes * 60_000 != self.market.candle_interval_ms {
            return Err(AppError::Config(format!(
                "market.candle_interval_ms ({}) does not match kline_interval {} min",
                self.market.candle_interval_ms, minutes
            )));
        }

        for (name, value) in [
            ("control.tick_interval_ms", self.control.tick_interval_ms),
            ("control.market_stale_ms", self.control.market_stale_ms),
            ("control.account_stale_ms", self.control.account_stale_ms),
            ("control.snapshot_interval_secs", self.control.snapshot_interval_secs),
            ("websocket.ping_interval_ms", self.websocket.ping_interval_ms),
            ("exchange.request_timeout_ms", self.exchange.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!("{name} must be positive")));
            }
        }
        if self.websocket.queue_capacity == 0 || self.persistence.ledger_buffer == 0 {
            return Err(AppError::Config(
                "queue and buffer sizes must be positive".into(),
            ));
        }
        if self.exchange.max_attempts == 0 || self.exchange.batch_limit == 0 {
            return Err(AppError::Config(
                "exchange.max_attempts and exchange.batch_limit must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Stream settings for both connections.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            public_url: self.exchange.public_ws_url().to_string(),
            private_url: self.exchange.private_ws_url().to_string(),
            symbol: self.instrument.symbol.clone(),
            kline_interval: self.instrument.kline_interval.clone(),
            connection: self.websocket.clone().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = include_str!("../../../config/default.toml");

    #[test]
    fn test_default_config_is_valid() {
        let mut config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.instrument.symbol, "BTCUSDT");
        assert!(config.exchange.testnet);
        assert!(config.exchange.credentials().is_none());
    }

    #[test]
    fn test_shipped_file_parses() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.quote.base_spread_bps, dec!(20));
        assert_eq!(config.risk.panic_exit_attempts, 3);
        assert_eq!(config.market.candle_interval_ms, 60_000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [instrument]
            symbol = "ETHUSDT"

            [quote]
            base_spread_bps = 10
            max_spread_bps = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.instrument.symbol, "ETHUSDT");
        assert_eq!(config.quote.base_spread_bps, dec!(10));
        assert_eq!(config.quote.inventory_skew_bps, dec!(5));
        assert_eq!(config.control.tick_interval_ms, 1000);
    }

    #[test]
    fn test_rebalance_threshold_clamped() {
        let config = AppConfig::from_toml_str(
            r#"
            [risk]
            max_position = 0.5
            rebalance_threshold = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.risk.rebalance_threshold, dec!(0.5));
    }

    #[test]
    fn test_rejects_mismatched_candle_interval() {
        let err = AppConfig::from_toml_str(
            r#"
            [instrument]
            kline_interval = "5"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_rejects_order_size_above_max_position() {
        let mut config = AppConfig::default();
        config.quote.max_order_size = dec!(2);
        config.risk.max_position = dec!(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_quote_section_surfaces() {
        let err = AppConfig::from_toml_str(
            r#"
            [quote]
            base_spread_bps = 30
            max_spread_bps = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Quote(_)));
    }

    #[test]
    fn test_endpoints_follow_network() {
        let mut exchange = ExchangeConfig::default();
        assert_eq!(exchange.rest_url(), TESTNET_REST);
        exchange.testnet = false;
        assert_eq!(exchange.rest_url(), MAINNET_REST);
        assert_eq!(exchange.private_ws_url(), MAINNET_PRIVATE_WS);
        exchange.rest_url = Some("http://127.0.0.1:8080".into());
        assert_eq!(exchange.rest_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_debug_hides_credentials() {
        let exchange = ExchangeConfig {
            api_key: Some("key-123".into()),
            api_secret: Some("secret-456".into()),
            ..Default::default()
        };
        let printed = format!("{exchange:?}");
        assert!(!printed.contains("secret-456"));
        assert!(!printed.contains("key-123"));
        assert!(exchange.credentials().is_some());
    }

    #[test]
    fn test_stream_config_carries_symbol() {
        let config = AppConfig::default();
        let stream = config.stream_config();
        assert_eq!(stream.symbol, "BTCUSDT");
        assert_eq!(stream.public_url, TESTNET_PUBLIC_WS);
        assert_eq!(stream.connection.ping_interval_ms, 20_000);
    }
}
