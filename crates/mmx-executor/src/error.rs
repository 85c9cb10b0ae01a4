//! Executor error types.

use mmx_exchange::ExchangeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),
}

impl ExecutorError {
    /// Authentication failures halt trading.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Exchange(e) if e.is_auth())
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
