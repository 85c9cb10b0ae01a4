//! Message parsing for stream topics.
//!
//! Public topics become `MarketEvent`s, private topics become
//! `AccountEvent`s. Items for other symbols are filtered out here so the
//! handlers only see the traded instrument.

use crate::error::{FeedError, FeedResult};
use mmx_core::{Candle, ExchangePosition, Fill, OrderUpdate, Price, Size};
use mmx_exchange::types::parse_decimal;
use mmx_exchange::{RawExecution, RawOrder, RawPosition, RawWallet, WalletBalance};
use mmx_ws::TopicMessage;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// One side of the top of book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookSide {
    pub price: Price,
    pub size: Size,
}

/// Public market data event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    /// Top-of-book update. Either side may be absent in a delta.
    TopOfBook {
        bid: Option<BookSide>,
        ask: Option<BookSide>,
        ts: u64,
    },
    /// Public trade print.
    Trade { price: Price, size: Size, ts: u64 },
    /// Kline update; `closed` once the exchange confirms the bar.
    Kline { candle: Candle, closed: bool },
}

/// Private account event.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
    Fills(Vec<Fill>),
    Orders(Vec<OrderUpdate>),
    Positions(Vec<ExchangePosition>),
    Wallet(Vec<WalletBalance>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTicker {
    symbol: String,
    bid1_price: Option<String>,
    bid1_size: Option<String>,
    ask1_price: Option<String>,
    ask1_size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBook {
    s: String,
    b: Vec<[String; 2]>,
    a: Vec<[String; 2]>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTrade {
    #[serde(rename = "T")]
    time: u64,
    s: String,
    p: String,
    v: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawKline {
    start: u64,
    open: String,
    high: String,
    low: String,
    close: String,
    confirm: bool,
}

/// Parser bound to one symbol.
#[derive(Debug, Clone)]
pub struct MessageParser {
    symbol: String,
}

impl MessageParser {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Parse a public topic message.
    pub fn parse_market(&self, msg: &TopicMessage) -> FeedResult<Vec<MarketEvent>> {
        match msg.channel() {
            "tickers" => self.parse_ticker(msg),
            "orderbook" => self.parse_book(msg),
            "publicTrade" => self.parse_trades(msg),
            "kline" => self.parse_klines(msg),
            _ => Err(FeedError::UnknownTopic(msg.topic.clone())),
        }
    }

    /// Parse a private topic message.
    pub fn parse_account(&self, msg: &TopicMessage) -> FeedResult<AccountEvent> {
        match msg.channel() {
            "execution" => {
                let raw: Vec<RawExecution> = items(&msg.data)?;
                let fills = raw
                    .into_iter()
                    .filter(|e| e.symbol == self.symbol)
                    .filter_map(RawExecution::into_fill)
                    .collect();
                Ok(AccountEvent::Fills(fills))
            }
            "order" => {
                let raw: Vec<RawOrder> = items(&msg.data)?;
                let mut updates = Vec::with_capacity(raw.len());
                for order in raw.into_iter().filter(|o| o.symbol == self.symbol) {
                    let status = order.order_status.clone();
                    match order.into_update() {
                        Some(update) => updates.push(update),
                        None => debug!(%status, "Skipping order event with unsupported status"),
                    }
                }
                Ok(AccountEvent::Orders(updates))
            }
            "position" => {
                let raw: Vec<RawPosition> = items(&msg.data)?;
                let positions = raw
                    .into_iter()
                    .filter(|p| p.symbol == self.symbol)
                    .filter_map(RawPosition::into_position)
                    .collect();
                Ok(AccountEvent::Positions(positions))
            }
            "wallet" => {
                let raw: Vec<RawWallet> = items(&msg.data)?;
                Ok(AccountEvent::Wallet(
                    raw.into_iter().map(RawWallet::into_balance).collect(),
                ))
            }
            _ => Err(FeedError::UnknownTopic(msg.topic.clone())),
        }
    }

    fn parse_ticker(&self, msg: &TopicMessage) -> FeedResult<Vec<MarketEvent>> {
        let raw: RawTicker = serde_json::from_value(msg.data.clone())?;
        if raw.symbol != self.symbol {
            return Ok(Vec::new());
        }
        let bid = book_side(raw.bid1_price.as_deref(), raw.bid1_size.as_deref());
        let ask = book_side(raw.ask1_price.as_deref(), raw.ask1_size.as_deref());
        if bid.is_none() && ask.is_none() {
            return Ok(Vec::new());
        }
        Ok(vec![MarketEvent::TopOfBook {
            bid,
            ask,
            ts: msg.ts,
        }])
    }

    fn parse_book(&self, msg: &TopicMessage) -> FeedResult<Vec<MarketEvent>> {
        let raw: RawBook = serde_json::from_value(msg.data.clone())?;
        if raw.s != self.symbol {
            return Ok(Vec::new());
        }
        // size "0" deletes a level; the replacement arrives in the same or next delta
        let bid = raw
            .b
            .first()
            .and_then(|[p, s]| book_side(Some(p.as_str()), Some(s.as_str())));
        let ask = raw
            .a
            .first()
            .and_then(|[p, s]| book_side(Some(p.as_str()), Some(s.as_str())));
        if bid.is_none() && ask.is_none() {
            return Ok(Vec::new());
        }
        Ok(vec![MarketEvent::TopOfBook {
            bid,
            ask,
            ts: msg.ts,
        }])
    }

    fn parse_trades(&self, msg: &TopicMessage) -> FeedResult<Vec<MarketEvent>> {
        let raw: Vec<RawTrade> = items(&msg.data)?;
        let mut events = Vec::with_capacity(raw.len());
        for trade in raw.into_iter().filter(|t| t.s == self.symbol) {
            match (parse_decimal(&trade.p), parse_decimal(&trade.v)) {
                (Some(p), Some(v)) if p.is_sign_positive() && !p.is_zero() => {
                    events.push(MarketEvent::Trade {
                        price: Price::new(p),
                        size: Size::new(v),
                        ts: trade.time,
                    });
                }
                _ => warn!(price = %trade.p, "Malformed trade print"),
            }
        }
        Ok(events)
    }

    fn parse_klines(&self, msg: &TopicMessage) -> FeedResult<Vec<MarketEvent>> {
        if !msg.topic.ends_with(&format!(".{}", self.symbol)) {
            return Ok(Vec::new());
        }
        let raw: Vec<RawKline> = items(&msg.data)?;
        raw.into_iter()
            .map(|k| {
                let price = |s: &str| {
                    parse_decimal(s)
                        .map(Price::new)
                        .ok_or_else(|| FeedError::InvalidData(format!("kline price {s:?}")))
                };
                Ok(MarketEvent::Kline {
                    candle: Candle {
                        start_ms: k.start,
                        open: price(&k.open)?,
                        high: price(&k.high)?,
                        low: price(&k.low)?,
                        close: price(&k.close)?,
                    },
                    closed: k.confirm,
                })
            })
            .collect()
    }
}

/// Private and trade topics carry arrays; accept a lone object too.
fn items<T: for<'de> Deserialize<'de>>(data: &Value) -> FeedResult<Vec<T>> {
    match data {
        Value::Array(_) => Ok(serde_json::from_value(data.clone())?),
        Value::Object(_) => Ok(vec![serde_json::from_value(data.clone())?]),
        Value::Null => Ok(Vec::new()),
        other => Err(FeedError::ParseError(format!("unexpected payload: {other}"))),
    }
}

fn book_side(price: Option<&str>, size: Option<&str>) -> Option<BookSide> {
    let price = parse_decimal(price?)?;
    if price.is_zero() || price.is_sign_negative() {
        return None;
    }
    // ticker deltas may carry a price without its size
    let size = match size {
        Some(s) => {
            let size = parse_decimal(s)?;
            if size.is_zero() {
                return None;
            }
            size
        }
        None => Decimal::ZERO,
    };
    Some(BookSide {
        price: Price::new(price),
        size: Size::new(size),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmx_core::{OrderSide, OrderStatus};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn topic(topic: &str, data: Value) -> TopicMessage {
        TopicMessage {
            topic: topic.to_string(),
            kind: "snapshot".to_string(),
            ts: 1_700_000_000_000,
            data,
        }
    }

    fn parser() -> MessageParser {
        MessageParser::new("BTCUSDT")
    }

    #[test]
    fn test_parse_orderbook_top() {
        let msg = topic(
            "orderbook.1.BTCUSDT",
            json!({"s": "BTCUSDT", "b": [["99.9", "1.5"]], "a": [["100.1", "2"]], "u": 1}),
        );
        let events = parser().parse_market(&msg).unwrap();
        assert_eq!(
            events,
            vec![MarketEvent::TopOfBook {
                bid: Some(BookSide {
                    price: Price::new(dec!(99.9)),
                    size: Size::new(dec!(1.5)),
                }),
                ask: Some(BookSide {
                    price: Price::new(dec!(100.1)),
                    size: Size::new(dec!(2)),
                }),
                ts: 1_700_000_000_000,
            }]
        );
    }

    #[test]
    fn test_orderbook_zero_size_is_ignored() {
        let msg = topic(
            "orderbook.1.BTCUSDT",
            json!({"s": "BTCUSDT", "b": [["99.9", "0"]], "a": []}),
        );
        assert!(parser().parse_market(&msg).unwrap().is_empty());
    }

    #[test]
    fn test_ticker_delta_with_one_side() {
        let msg = topic(
            "tickers.BTCUSDT",
            json!({"symbol": "BTCUSDT", "ask1Price": "100.2", "ask1Size": "3"}),
        );
        let events = parser().parse_market(&msg).unwrap();
        match &events[0] {
            MarketEvent::TopOfBook { bid, ask, .. } => {
                assert!(bid.is_none());
                assert_eq!(ask.unwrap().price, Price::new(dec!(100.2)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_other_symbol_filtered() {
        let msg = topic(
            "tickers.ETHUSDT",
            json!({"symbol": "ETHUSDT", "bid1Price": "10", "bid1Size": "1"}),
        );
        assert!(parser().parse_market(&msg).unwrap().is_empty());
    }

    #[test]
    fn test_parse_trades_and_klines() {
        let trades = topic(
            "publicTrade.BTCUSDT",
            json!([{"T": 1, "s": "BTCUSDT", "S": "Buy", "v": "0.1", "p": "100.5"}]),
        );
        let events = parser().parse_market(&trades).unwrap();
        assert!(matches!(events[0], MarketEvent::Trade { ts: 1, .. }));

        let kline = topic(
            "kline.1.BTCUSDT",
            json!([{"start": 60000, "end": 119999, "interval": "1", "open": "100",
                    "close": "101", "high": "102", "low": "99", "confirm": true}]),
        );
        let events = parser().parse_market(&kline).unwrap();
        match &events[0] {
            MarketEvent::Kline { candle, closed } => {
                assert!(*closed);
                assert_eq!(candle.high, Price::new(dec!(102)));
                assert_eq!(candle.start_ms, 60000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_topic() {
        let msg = topic("liquidation.BTCUSDT", json!({}));
        assert!(matches!(
            parser().parse_market(&msg),
            Err(FeedError::UnknownTopic(_))
        ));
    }

    #[test]
    fn test_parse_execution() {
        let msg = topic(
            "execution",
            json!([
                {"symbol": "BTCUSDT", "execId": "e1", "orderId": "o1", "side": "Buy",
                 "execPrice": "100", "execQty": "0.5", "execFee": "0.01",
                 "execTime": "1700000000000", "execType": "Trade"},
                {"symbol": "BTCUSDT", "execId": "e2", "orderId": "", "side": "Sell",
                 "execPrice": "100", "execQty": "0.5", "execType": "Funding"},
                {"symbol": "ETHUSDT", "execId": "e3", "orderId": "o3", "side": "Buy",
                 "execPrice": "10", "execQty": "1", "execType": "Trade"}
            ]),
        );
        let AccountEvent::Fills(fills) = parser().parse_account(&msg).unwrap() else {
            panic!("expected fills");
        };
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].exec_id, "e1");
        assert_eq!(fills[0].side, OrderSide::Buy);
    }

    #[test]
    fn test_parse_order_events() {
        let msg = topic(
            "order",
            json!([{"symbol": "BTCUSDT", "orderId": "o1", "orderLinkId": "mmx_1_abcd1234",
                    "side": "Sell", "price": "100.1", "qty": "1", "cumExecQty": "0.4",
                    "orderStatus": "PartiallyFilled", "reduceOnly": false,
                    "createdTime": "1", "updatedTime": "2"}]),
        );
        let AccountEvent::Orders(orders) = parser().parse_account(&msg).unwrap() else {
            panic!("expected orders");
        };
        assert_eq!(orders[0].status, OrderStatus::PartiallyFilled);
        assert_eq!(orders[0].cum_exec_qty, Size::new(dec!(0.4)));
    }

    #[test]
    fn test_parse_position_and_wallet() {
        let pos = topic(
            "position",
            json!([{"symbol": "BTCUSDT", "side": "Sell", "size": "2", "entryPrice": "100",
                    "unrealisedPnl": "-1", "cumRealisedPnl": "3"}]),
        );
        let AccountEvent::Positions(positions) = parser().parse_account(&pos).unwrap() else {
            panic!("expected positions");
        };
        assert_eq!(positions[0].qty, dec!(-2));

        let wallet = topic(
            "wallet",
            json!([{"accountType": "UNIFIED", "totalEquity": "1000",
                    "totalWalletBalance": "990", "totalAvailableBalance": "500"}]),
        );
        let AccountEvent::Wallet(balances) = parser().parse_account(&wallet).unwrap() else {
            panic!("expected wallet");
        };
        assert_eq!(balances[0].total_equity, dec!(1000));
    }
}
