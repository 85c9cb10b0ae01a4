//! Mock Bybit-style WebSocket server for integration tests.
//!
//! Answers `subscribe`, `auth` and `ping` ops the way the exchange does,
//! records every text frame and can push topic frames after each
//! subscription ack.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Server behaviour.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Answer auth requests with `success: false`.
    pub reject_auth: bool,
    /// Frames sent after every subscribe ack.
    pub push_after_subscribe: Vec<Value>,
}

#[derive(Default)]
struct Shared {
    messages: Mutex<Vec<String>>,
    connections: Mutex<u32>,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    shared: Arc<Shared>,
}

impl MockWsServer {
    /// Start a server that accepts everything.
    pub async fn start() -> Self {
        Self::start_with(MockBehavior::default()).await
    }

    pub async fn start_with(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let server_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, server_shared.clone(), behavior.clone()));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            shared,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.shared.connections.lock().await
    }

    /// Every text frame received, parsed as JSON.
    pub async fn received(&self) -> Vec<Value> {
        self.shared
            .messages
            .lock()
            .await
            .iter()
            .filter_map(|m| serde_json::from_str(m).ok())
            .collect()
    }

    /// `op` of every frame received, in order.
    pub async fn received_ops(&self) -> Vec<String> {
        self.received()
            .await
            .iter()
            .filter_map(|v| v.get("op").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>, behavior: MockBehavior) {
    *shared.connections.lock().await += 1;

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                shared.messages.lock().await.push(text.clone());
                let Ok(request) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let replies = match request.get("op").and_then(Value::as_str) {
                    Some("subscribe") => {
                        let mut out = vec![json!({
                            "success": true,
                            "ret_msg": "",
                            "conn_id": "mock",
                            "op": "subscribe"
                        })];
                        out.extend(behavior.push_after_subscribe.iter().cloned());
                        out
                    }
                    Some("auth") => {
                        let ret_msg = if behavior.reject_auth { "invalid signature" } else { "" };
                        vec![json!({
                            "success": !behavior.reject_auth,
                            "ret_msg": ret_msg,
                            "conn_id": "mock",
                            "op": "auth"
                        })]
                    }
                    Some("ping") => vec![json!({"op": "pong", "args": ["0"], "conn_id": "mock"})],
                    _ => Vec::new(),
                };
                for reply in replies {
                    if write.send(Message::Text(reply.to_string())).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
}
