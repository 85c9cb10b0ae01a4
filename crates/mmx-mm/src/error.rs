//! Quoting error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MmError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type MmResult<T> = Result<T, MmError>;
