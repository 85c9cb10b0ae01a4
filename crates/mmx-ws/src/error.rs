//! Stream error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("No message received within {0} ms")]
    MessageTimeout(u64),

    #[error("{op} timed out after {ms} ms")]
    Timeout { op: &'static str, ms: u64 },

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Signing error: {0}")]
    Signing(#[from] mmx_exchange::ExchangeError),
}

pub type WsResult<T> = Result<T, WsError>;
