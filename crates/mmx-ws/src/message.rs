//! Stream message types.
//!
//! Inbound frames are either control responses (`op` present) or topic
//! data (`topic` present). Only topic data is forwarded to handlers.

use serde::Serialize;
use serde_json::Value;

use crate::error::{WsError, WsResult};

/// Parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    /// Reply to our ping.
    Pong,
    /// Reply to an `auth` op.
    AuthAck { success: bool, message: String },
    /// Reply to a `subscribe` op.
    SubscribeAck { success: bool, message: String },
    /// Topic data.
    Data(TopicMessage),
    /// Anything else; logged and dropped.
    Other(Value),
}

/// Topic payload forwarded to a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    /// Full topic, e.g. `orderbook.1.BTCUSDT` or `execution`.
    pub topic: String,
    /// `snapshot` or `delta` for public topics; empty for private ones.
    pub kind: String,
    /// Exchange timestamp (ms), or creation time for private topics.
    pub ts: u64,
    pub data: Value,
}

impl TopicMessage {
    /// First dot-separated segment (`orderbook`, `tickers`, `order`, ...).
    pub fn channel(&self) -> &str {
        self.topic.split('.').next().unwrap_or_default()
    }
}

impl WsMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> WsResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> WsResult<Self> {
        if !value.is_object() {
            return Err(WsError::ParseError(format!("expected object, got {value}")));
        }

        if let Some(topic) = value.get("topic").and_then(Value::as_str) {
            let ts = value
                .get("ts")
                .or_else(|| value.get("creationTime"))
                .and_then(Value::as_u64)
                .unwrap_or_default();
            return Ok(Self::Data(TopicMessage {
                topic: topic.to_string(),
                kind: value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                ts,
                data: value.get("data").cloned().unwrap_or(Value::Null),
            }));
        }

        let op = value.get("op").and_then(Value::as_str).unwrap_or_default();
        let ret_msg = value
            .get("ret_msg")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let success = value
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // public streams answer ping with op "ping" and ret_msg "pong"
        if op == "pong" || (op == "ping" && ret_msg == "pong") {
            return Ok(Self::Pong);
        }
        match op {
            "auth" => Ok(Self::AuthAck {
                success,
                message: ret_msg.to_string(),
            }),
            "subscribe" => Ok(Self::SubscribeAck {
                success,
                message: ret_msg.to_string(),
            }),
            _ => Ok(Self::Other(value)),
        }
    }
}

/// Outbound control request.
#[derive(Debug, Clone, Serialize)]
pub struct WsRequest {
    pub op: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

impl WsRequest {
    pub fn ping() -> Self {
        Self {
            op: "ping",
            args: Vec::new(),
        }
    }

    pub fn subscribe(topics: &[String]) -> Self {
        Self {
            op: "subscribe",
            args: topics.iter().map(|t| Value::String(t.clone())).collect(),
        }
    }

    /// `{"op":"auth","args":[api_key, expires, signature]}`
    pub fn auth(api_key: String, expires_ms: u64, signature: String) -> Self {
        Self {
            op: "auth",
            args: vec![
                Value::String(api_key),
                Value::from(expires_ms),
                Value::String(signature),
            ],
        }
    }

    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
