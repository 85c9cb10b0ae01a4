//! Position error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Fill for {got} applied to {expected} position")]
    SymbolMismatch { expected: String, got: String },

    #[error("Invalid position state: {0}")]
    InvalidState(String),
}

pub type PositionResult<T> = Result<T, PositionError>;
