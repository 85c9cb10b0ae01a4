//! Stream connections for the mmx market maker.
//!
//! Provides:
//! - Per-connection lifecycle: Disconnected → Connecting → Subscribed → Streaming
//! - Automatic reconnection with exponential backoff, reset after a healthy period
//! - Private stream authentication before subscribing
//! - Heartbeat monitoring (app-level ping, pong and message timeouts)
//! - One queue per connection so every message reaches exactly one handler

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod stream;
pub mod subscription;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, ReconnectPolicy};
pub use error::{WsError, WsResult};
pub use message::{TopicMessage, WsMessage, WsRequest};
pub use stream::{StreamConfig, StreamManager};
pub use subscription::{private_topics, public_topics, StreamKind};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any stream connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
