//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] mmx_core::CoreError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] mmx_exchange::ExchangeError),

    #[error("Executor error: {0}")]
    Executor(#[from] mmx_executor::ExecutorError),

    #[error("Risk error: {0}")]
    Risk(#[from] mmx_risk::RiskError),

    #[error("Quote config error: {0}")]
    Quote(#[from] mmx_mm::MmError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] mmx_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] mmx_persistence::PersistenceError),

    #[error("Startup error: {0}")]
    Startup(String),
}

impl From<::config::ConfigError> for AppError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
