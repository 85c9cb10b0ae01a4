//! Exchange REST access for the mmx market maker.
//!
//! - `ExchangeClient`: signed REST calls with uniform retry and rate limiting
//! - `RateLimiter`: rolling-window request limiter with async `acquire()`
//! - `RetryPolicy`: bounded exponential backoff for Transient/RateLimit errors
//! - `Credentials`: API key pair and HMAC-SHA256 request signing
//! - `OrderGateway`: dyn-compatible seam used by the order manager

pub mod client;
pub mod error;
pub mod gateway;
pub mod rate_limiter;
pub mod retry;
pub mod signer;
pub mod types;

pub use client::{ClientConfig, ExchangeClient};
pub use error::{classify_ret_code, ExchangeError, ExchangeResult};
pub use gateway::{
    BoxFuture, CancelRequest, DynOrderGateway, ItemResult, MockOrderGateway, OrderGateway,
    PlaceAck,
};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use signer::Credentials;
pub use types::{
    ApiEnvelope, RawExecution, RawOrder, RawPosition, RawWallet, WalletBalance,
};
