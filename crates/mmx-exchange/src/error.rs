//! Exchange error taxonomy.
//!
//! Every failure from the exchange is folded into one of a few kinds, and
//! only the kind decides what the engine does next:
//!
//! | kind                | action                               |
//! |---------------------|--------------------------------------|
//! | Auth                | halt trading                         |
//! | RateLimit           | back off and retry                   |
//! | InsufficientBalance | skip the order                       |
//! | Validation          | skip the order, never retried        |
//! | Transient           | back off and retry                   |
//! | StaleState          | full resync before trading resumes   |
//!
//! The code table below is the only place that knows Bybit `retCode`s.

use thiserror::Error;

/// `retCode` values that mean "nothing to do" rather than failure.
const BENIGN_CODES: &[i64] = &[
    110043, // leverage not modified
    34036,  // leverage not modified (legacy)
];

const AUTH_CODES: &[i64] = &[10003, 10004, 10005, 10007, 10009, 33004];
const RATE_LIMIT_CODES: &[i64] = &[10006, 10018, 10429];
const INSUFFICIENT_BALANCE_CODES: &[i64] = &[110004, 110007, 110012, 110044, 110045];
const TRANSIENT_CODES: &[i64] = &[10000, 10016, 10019, 170007];

/// Order does not exist (already filled, cancelled or never placed).
const ORDER_NOT_FOUND_CODES: &[i64] = &[110001, 170213];

/// Exchange errors.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("Authentication failed (code {code}): {message}")]
    Auth { code: i64, message: String },

    #[error("Rate limited (code {code}): {message}")]
    RateLimit { code: i64, message: String },

    #[error("Insufficient balance (code {code}): {message}")]
    InsufficientBalance { code: i64, message: String },

    #[error("Validation error (code {code}): {message}")]
    Validation { code: i64, message: String },

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Stale state: {0}")]
    StaleState(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl ExchangeError {
    /// Only Transient and RateLimit are retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimit { .. })
    }

    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Cancel target no longer exists on the exchange.
    #[must_use]
    pub fn is_order_not_found(&self) -> bool {
        matches!(self, Self::Validation { code, .. } if ORDER_NOT_FOUND_CODES.contains(code))
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::RateLimit { .. } => "rate_limit",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::Validation { .. } => "validation",
            Self::Transient(_) => "transient",
            Self::StaleState(_) => "stale_state",
            Self::HttpClient(_) => "http_client",
        }
    }

    /// Map a non-success HTTP status.
    #[must_use]
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}: {}", truncate(body, 200));
        match status {
            401 => Self::Auth {
                code: i64::from(status),
                message,
            },
            403 | 429 => Self::RateLimit {
                code: i64::from(status),
                message,
            },
            500..=599 => Self::Transient(message),
            _ => Self::Validation {
                code: i64::from(status),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transient(format!("request timed out: {err}"))
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::Transient(format!("connection error: {err}"))
        } else if err.is_decode() {
            Self::Validation {
                code: -1,
                message: format!("response decode failed: {err}"),
            }
        } else if let Some(status) = err.status() {
            Self::from_http_status(status.as_u16(), &err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

/// Classify a `retCode`. Returns `None` on success.
///
/// Unrecognized non-zero codes are Validation: they fail fast instead of
/// being amplified by retries.
#[must_use]
pub fn classify_ret_code(code: i64, message: &str) -> Option<ExchangeError> {
    if code == 0 || BENIGN_CODES.contains(&code) {
        return None;
    }
    let message = message.to_string();
    let err = if AUTH_CODES.contains(&code) {
        ExchangeError::Auth { code, message }
    } else if RATE_LIMIT_CODES.contains(&code) {
        ExchangeError::RateLimit { code, message }
    } else if INSUFFICIENT_BALANCE_CODES.contains(&code) {
        ExchangeError::InsufficientBalance { code, message }
    } else if TRANSIENT_CODES.contains(&code) {
        ExchangeError::Transient(format!("code {code}: {message}"))
    } else {
        ExchangeError::Validation { code, message }
    };
    Some(err)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Result type alias for exchange operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;
