//! Stream connection manager.
//!
//! Handles one connection's lifecycle: connect, optional authentication,
//! subscribe, stream, and reconnect with exponential backoff. The backoff
//! returns to its initial delay once a connection has stayed healthy long
//! enough.

use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatCheck, HeartbeatManager};
use crate::message::{TopicMessage, WsMessage, WsRequest};
use crate::subscription::{subscribe_batches, StreamKind};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use mmx_core::{unix_ms, ExponentialBackoff};
use mmx_exchange::Credentials;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Stream URL.
    pub url: String,
    /// Public or private stream.
    pub kind: StreamKind,
    /// Topics to subscribe after connect (and after auth, if private).
    pub topics: Vec<String>,
    /// Required for private streams.
    pub credentials: Option<Credentials>,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// First reconnect delay.
    pub reconnect_initial_ms: u64,
    /// Reconnect delay cap.
    pub reconnect_max_ms: u64,
    /// Fraction of the delay added as random jitter.
    pub reconnect_jitter: f64,
    /// Time a connection must stay healthy before backoff resets.
    pub healthy_reset_ms: u64,
    /// Application ping interval.
    pub ping_interval_ms: u64,
    /// Pong must arrive within this.
    pub pong_timeout_ms: u64,
    /// Longest tolerated silence on the socket.
    pub message_timeout_ms: u64,
    /// Validity window of the auth signature.
    pub auth_expiry_ms: u64,
    /// Limit for the handshake and for each outbound frame.
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            kind: StreamKind::Public,
            topics: Vec::new(),
            credentials: None,
            max_reconnect_attempts: 0,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            reconnect_jitter: 0.2,
            healthy_reset_ms: 60_000,
            ping_interval_ms: 20_000,
            pong_timeout_ms: 10_000,
            message_timeout_ms: 60_000,
            auth_expiry_ms: 10_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Handshake in progress, or waiting for the auth ack.
    Connecting,
    /// Subscribe requests sent, acks outstanding.
    Subscribed,
    /// All subscriptions confirmed or data flowing.
    Streaming,
    /// Waiting out a backoff delay.
    Reconnecting,
}

/// Reconnect delay schedule.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    backoff: ExponentialBackoff,
    healthy_reset: Duration,
}

impl ReconnectPolicy {
    pub fn new(backoff: ExponentialBackoff, healthy_reset: Duration) -> Self {
        Self {
            backoff,
            healthy_reset,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            ExponentialBackoff::new(
                Duration::from_millis(config.reconnect_initial_ms),
                Duration::from_millis(config.reconnect_max_ms),
                config.reconnect_jitter,
            ),
            Duration::from_millis(config.healthy_reset_ms),
        )
    }

    /// Delay before the next attempt, given how long the dropped connection
    /// had been streaming.
    pub fn on_disconnect(&mut self, healthy_for: Duration) -> Duration {
        if healthy_for >= self.healthy_reset {
            self.backoff.reset();
        }
        self.backoff.next_delay()
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.backoff.attempt()
    }
}

/// Per-session bookkeeping, reset on every connect.
#[derive(Debug, Default)]
struct Session {
    pending_acks: usize,
    failed_acks: usize,
    streaming_since: Option<Instant>,
}

/// Stream connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    heartbeat: Arc<HeartbeatManager>,
    message_tx: mpsc::Sender<TopicMessage>,
    reconnect_count: AtomicU32,
    dropped: AtomicU64,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager.
    ///
    /// `shutdown_token` is normally a child of the application token.
    pub fn new(
        config: ConnectionConfig,
        message_tx: mpsc::Sender<TopicMessage>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let heartbeat = HeartbeatManager::new(
            config.ping_interval_ms,
            config.pong_timeout_ms,
            config.message_timeout_ms,
        );
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            heartbeat: Arc::new(heartbeat),
            message_tx,
            reconnect_count: AtomicU32::new(0),
            dropped: AtomicU64::new(0),
            shutdown_token,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.config.kind
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    /// Reconnect attempts since the last healthy connection.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Public messages dropped because the handler queue was full.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!(kind = %self.config.kind, "ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Connect and run until shutdown or until reconnect attempts run out.
    pub async fn run(&self) -> WsResult<()> {
        if self.config.kind == StreamKind::Private && self.config.credentials.is_none() {
            return Err(WsError::AuthFailed(
                "private stream requires credentials".to_string(),
            ));
        }

        let mut policy = ReconnectPolicy::from_config(&self.config);

        loop {
            if self.is_shutdown() {
                info!(kind = %self.config.kind, "Shutdown requested, exiting connect loop");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            let mut session = Session::default();

            match self.try_connect(&mut session).await {
                Ok(()) => info!(kind = %self.config.kind, "Stream connection closed"),
                Err(e) => error!(kind = %self.config.kind, error = %e, "Stream connection error"),
            }

            if self.is_shutdown() {
                info!(kind = %self.config.kind, "Shutdown requested after disconnect, not reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            let healthy_for = session
                .streaming_since
                .map(|since| since.elapsed())
                .unwrap_or_default();
            let delay = policy.on_disconnect(healthy_for);
            let attempt = policy.attempts();
            self.reconnect_count.store(attempt, Ordering::Relaxed);

            if self.config.max_reconnect_attempts > 0 && attempt > self.config.max_reconnect_attempts
            {
                error!(kind = %self.config.kind, attempt, "Max reconnection attempts reached");
                self.set_state(ConnectionState::Disconnected);
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            self.set_state(ConnectionState::Reconnecting);
            warn!(
                kind = %self.config.kind,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!(kind = %self.config.kind, "Shutdown requested during backoff, exiting");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self, session: &mut Session) -> WsResult<()> {
        info!(url = %self.config.url, kind = %self.config.kind, "Connecting to stream");

        let (ws_stream, _response) = self
            .timed(
                "connect",
                connect_async_tls_with_config(&self.config.url, None, true, None),
            )
            .await?;
        let (mut write, mut read) = ws_stream.split();
        self.heartbeat.reset();

        match self.config.kind {
            StreamKind::Private => self.send_auth(&mut write).await?,
            StreamKind::Public => self.send_subscriptions(&mut write, session).await?,
        }

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!(kind = %self.config.kind, "Shutdown signal received in message loop");
                    if let Err(e) = self.timed("close", write.send(Message::Close(None))).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text, &mut write, session).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            self.timed("pong", write.send(Message::Pong(data))).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_message();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(kind = %self.config.kind, code, %reason, "Stream closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            warn!(kind = %self.config.kind, "Stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    match self.heartbeat.check() {
                        HeartbeatCheck::Healthy => {}
                        HeartbeatCheck::SendPing => {
                            let ping = Message::Text(WsRequest::ping().to_text()?);
                            self.timed("ping", write.send(ping)).await?;
                            self.heartbeat.record_ping();
                            debug!(kind = %self.config.kind, "Sent heartbeat ping");
                        }
                        HeartbeatCheck::PongTimeout => {
                            error!(kind = %self.config.kind, "Heartbeat timeout");
                            return Err(WsError::HeartbeatTimeout);
                        }
                        HeartbeatCheck::MessageTimeout => {
                            error!(kind = %self.config.kind, "No messages within timeout");
                            return Err(WsError::MessageTimeout(self.heartbeat.message_timeout_ms()));
                        }
                    }
                }
            }
        }
    }

    async fn send_auth(&self, write: &mut WsSink) -> WsResult<()> {
        let credentials = self
            .config
            .credentials
            .as_ref()
            .ok_or_else(|| WsError::AuthFailed("missing credentials".to_string()))?;
        let expires = unix_ms() + self.config.auth_expiry_ms;
        let (key, expires, signature) = credentials.ws_auth_args(expires)?;
        let auth = Message::Text(WsRequest::auth(key, expires, signature).to_text()?);
        self.timed("auth", write.send(auth)).await?;
        debug!("Sent auth request");
        Ok(())
    }

    async fn send_subscriptions(&self, write: &mut WsSink, session: &mut Session) -> WsResult<()> {
        for batch in subscribe_batches(&self.config.topics) {
            let request = Message::Text(WsRequest::subscribe(&batch).to_text()?);
            self.timed("subscribe", write.send(request)).await?;
            session.pending_acks += 1;
        }
        self.set_state(ConnectionState::Subscribed);
        info!(
            kind = %self.config.kind,
            topics = self.config.topics.len(),
            requests = session.pending_acks,
            "Subscriptions sent"
        );
        if session.pending_acks == 0 {
            self.mark_streaming(session);
        }
        Ok(())
    }

    /// Bound a network operation by the connect timeout.
    async fn timed<T, E>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> WsResult<T>
    where
        WsError: From<E>,
    {
        let limit = Duration::from_millis(self.config.connect_timeout_ms);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(WsError::from),
            Err(_) => {
                warn!(kind = %self.config.kind, op, "Stream operation timed out");
                Err(WsError::Timeout {
                    op,
                    ms: self.config.connect_timeout_ms,
                })
            }
        }
    }

    fn mark_streaming(&self, session: &mut Session) {
        if session.streaming_since.is_none() {
            session.streaming_since = Some(Instant::now());
            self.set_state(ConnectionState::Streaming);
            info!(kind = %self.config.kind, "Stream is live");
        }
    }

    async fn handle_text(
        &self,
        text: &str,
        write: &mut WsSink,
        session: &mut Session,
    ) -> WsResult<()> {
        self.heartbeat.record_message();

        let msg = match WsMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(kind = %self.config.kind, error = %e, "Unparseable stream message");
                return Ok(());
            }
        };

        match msg {
            WsMessage::Pong => {
                self.heartbeat.record_pong();
            }
            WsMessage::AuthAck { success, message } => {
                if !success {
                    return Err(WsError::AuthFailed(message));
                }
                info!("Private stream authenticated");
                self.send_subscriptions(write, session).await?;
            }
            WsMessage::SubscribeAck { success, message } => {
                session.pending_acks = session.pending_acks.saturating_sub(1);
                if !success {
                    session.failed_acks += 1;
                    error!(kind = %self.config.kind, %message, "Subscription rejected");
                    return Err(WsError::SubscriptionError(message));
                }
                if session.pending_acks == 0 && session.failed_acks == 0 {
                    self.mark_streaming(session);
                }
            }
            WsMessage::Data(topic_msg) => {
                self.mark_streaming(session);
                self.deliver(topic_msg).await;
            }
            WsMessage::Other(value) => {
                debug!(kind = %self.config.kind, %value, "Ignoring stream message");
            }
        }
        Ok(())
    }

    /// Public data may be dropped under pressure; account events may not.
    async fn deliver(&self, msg: TopicMessage) {
        match self.config.kind {
            StreamKind::Public => match self.message_tx.try_send(msg) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(topic = %msg.topic, dropped, "Market queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("Market message receiver dropped");
                }
            },
            StreamKind::Private => {
                tokio::select! {
                    res = self.message_tx.send(msg) => {
                        if res.is_err() {
                            warn!("Account message receiver dropped");
                        }
                    }
                    () = self.shutdown_token.cancelled() => {}
                }
            }
        }
    }
}
