//! Topic sets per stream.

/// Which connection a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Market data; no authentication.
    Public,
    /// Account events; authenticated.
    Private,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// Max args per subscribe request accepted by the exchange.
pub const MAX_ARGS_PER_SUBSCRIBE: usize = 10;

/// Market data topics for one symbol.
pub fn public_topics(symbol: &str, kline_interval: &str) -> Vec<String> {
    vec![
        format!("tickers.{symbol}"),
        format!("orderbook.1.{symbol}"),
        format!("publicTrade.{symbol}"),
        format!("kline.{kline_interval}.{symbol}"),
    ]
}

/// Account topics.
pub fn private_topics() -> Vec<String> {
    ["order", "execution", "position", "wallet"]
        .iter()
        .map(|t| (*t).to_string())
        .collect()
}

/// Split topics into subscribe-sized groups.
pub fn subscribe_batches(topics: &[String]) -> Vec<Vec<String>> {
    topics
        .chunks(MAX_ARGS_PER_SUBSCRIBE)
        .map(<[String]>::to_vec)
        .collect()
}
