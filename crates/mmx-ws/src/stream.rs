//! Stream manager: one public and an optional private connection.
//!
//! Each connection owns its own queue, so a message reaches exactly one
//! handler. Connections run as independent tasks under child tokens of the
//! application's shutdown token.

use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState};
use crate::message::TopicMessage;
use crate::subscription::{private_topics, public_topics, StreamKind};
use mmx_exchange::Credentials;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Stream endpoints and topic parameters.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub public_url: String,
    pub private_url: String,
    pub symbol: String,
    pub kline_interval: String,
    /// Template for both connections; url, kind, topics and credentials
    /// are filled in per connection.
    pub connection: ConnectionConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            public_url: "wss://stream.bybit.com/v5/public/linear".to_string(),
            private_url: "wss://stream.bybit.com/v5/private".to_string(),
            symbol: String::new(),
            kline_interval: "1".to_string(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Owner of the stream connections.
pub struct StreamManager {
    public: Arc<ConnectionManager>,
    private: Option<Arc<ConnectionManager>>,
    shutdown_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl StreamManager {
    /// Build connections. The private connection exists only when
    /// credentials are supplied.
    pub fn new(
        config: StreamConfig,
        credentials: Option<Credentials>,
        market_tx: mpsc::Sender<TopicMessage>,
        account_tx: mpsc::Sender<TopicMessage>,
        parent: &CancellationToken,
    ) -> Self {
        let shutdown_token = parent.child_token();

        let public_config = ConnectionConfig {
            url: config.public_url.clone(),
            kind: StreamKind::Public,
            topics: public_topics(&config.symbol, &config.kline_interval),
            credentials: None,
            ..config.connection.clone()
        };
        let public = Arc::new(ConnectionManager::new(
            public_config,
            market_tx,
            shutdown_token.child_token(),
        ));

        let private = credentials.filter(Credentials::is_configured).map(|creds| {
            let private_config = ConnectionConfig {
                url: config.private_url.clone(),
                kind: StreamKind::Private,
                topics: private_topics(),
                credentials: Some(creds),
                ..config.connection.clone()
            };
            Arc::new(ConnectionManager::new(
                private_config,
                account_tx,
                shutdown_token.child_token(),
            ))
        });

        Self {
            public,
            private,
            shutdown_token,
            handles: Vec::new(),
        }
    }

    /// Spawn a task per connection.
    pub fn spawn(&mut self) {
        crate::init_crypto();
        let conns = std::iter::once(self.public.clone()).chain(self.private.clone());
        for conn in conns {
            let handle = tokio::spawn(async move {
                let kind = conn.kind();
                match conn.run().await {
                    Ok(()) => info!(%kind, "Stream task finished"),
                    Err(e) => error!(%kind, error = %e, "Stream task failed"),
                }
            });
            self.handles.push(handle);
        }
    }

    pub fn public_state(&self) -> ConnectionState {
        self.public.state()
    }

    pub fn private_state(&self) -> Option<ConnectionState> {
        self.private.as_ref().map(|c| c.state())
    }

    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    /// All configured connections are streaming.
    pub fn is_streaming(&self) -> bool {
        self.public.is_streaming() && self.private.as_ref().map_or(true, |c| c.is_streaming())
    }

    /// Public messages dropped so far.
    pub fn dropped_messages(&self) -> u64 {
        self.public.dropped_messages()
    }

    /// Cancel all connections and wait for their tasks.
    pub async fn shutdown(&mut self) {
        self.shutdown_token.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Stream task panicked");
            }
        }
        info!("Streams shut down");
    }
}
