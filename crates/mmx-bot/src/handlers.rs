//! Stream message handlers.
//!
//! Each queue has exactly one consumer task. Private events are applied in
//! arrival order.

use std::sync::Arc;

use mmx_executor::OrderManager;
use mmx_feed::{AccountEvent, FeedError, MarketState, MessageParser};
use mmx_persistence::LedgerEvent;
use mmx_position::PositionState;
use mmx_ws::TopicMessage;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Folds public topic messages into the market state.
pub struct MarketHandler {
    parser: MessageParser,
    market: Arc<MarketState>,
}

impl MarketHandler {
    pub fn new(symbol: &str, market: Arc<MarketState>) -> Self {
        Self {
            parser: MessageParser::new(symbol),
            market,
        }
    }

    /// Apply one message. Returns the number of events applied.
    pub fn handle(&self, msg: &TopicMessage) -> usize {
        match self.parser.parse_market(msg) {
            Ok(events) => {
                for event in &events {
                    self.market.apply(event);
                }
                events.len()
            }
            Err(FeedError::UnknownTopic(topic)) => {
                debug!(%topic, "Ignoring public topic");
                0
            }
            Err(e) => {
                warn!(topic = %msg.topic, error = %e, "Failed to parse public message");
                0
            }
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<TopicMessage>) {
        while let Some(msg) = rx.recv().await {
            self.handle(&msg);
        }
        info!("Market handler stopped");
    }
}

/// Applies private events to position and order state and forwards them
/// to the ledger.
pub struct AccountHandler {
    parser: MessageParser,
    position: Arc<PositionState>,
    orders: Arc<OrderManager>,
    ledger_tx: mpsc::UnboundedSender<LedgerEvent>,
}

impl AccountHandler {
    pub fn new(
        symbol: &str,
        position: Arc<PositionState>,
        orders: Arc<OrderManager>,
        ledger_tx: mpsc::UnboundedSender<LedgerEvent>,
    ) -> Self {
        Self {
            parser: MessageParser::new(symbol),
            position,
            orders,
            ledger_tx,
        }
    }

    pub fn handle(&self, msg: &TopicMessage) {
        let event = match self.parser.parse_account(msg) {
            Ok(event) => event,
            Err(FeedError::UnknownTopic(topic)) => {
                debug!(%topic, "Ignoring private topic");
                return;
            }
            Err(e) => {
                warn!(topic = %msg.topic, error = %e, "Failed to parse private message");
                return;
            }
        };

        match event {
            AccountEvent::Fills(fills) => {
                for fill in fills {
                    match self.position.apply_fill(&fill) {
                        Ok(true) => self.record(LedgerEvent::Fill(fill)),
                        Ok(false) => {}
                        Err(e) => warn!(exec_id = %fill.exec_id, error = %e, "Fill not applied"),
                    }
                }
            }
            AccountEvent::Orders(updates) => {
                for update in updates {
                    self.orders.on_order_update(&update);
                    self.record(LedgerEvent::Order(update));
                }
            }
            AccountEvent::Positions(positions) => {
                for position in positions
                    .iter()
                    .filter(|p| p.symbol == self.position.symbol())
                {
                    self.position.on_exchange_update(position);
                }
            }
            AccountEvent::Wallet(balances) => {
                for balance in balances {
                    self.position.update_equity(balance.total_equity);
                    self.record(LedgerEvent::Balance {
                        total_equity: balance.total_equity,
                        wallet_balance: balance.wallet_balance,
                        available_balance: balance.available_balance,
                    });
                }
            }
        }
    }

    fn record(&self, event: LedgerEvent) {
        if self.ledger_tx.send(event).is_err() {
            debug!("Ledger queue closed, event not recorded");
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<TopicMessage>) {
        while let Some(msg) = rx.recv().await {
            self.handle(&msg);
        }
        info!("Account handler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmx_core::{OrderRequest, OrderSide, Price, QuoteRole, Size};
    use mmx_exchange::{DynOrderGateway, MockOrderGateway};
    use mmx_executor::ReconcileConfig;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn topic(topic: &str, data: Value) -> TopicMessage {
        TopicMessage {
            topic: topic.to_string(),
            kind: "snapshot".to_string(),
            ts: 1_700_000_000_000,
            data,
        }
    }

    fn account() -> (
        AccountHandler,
        Arc<PositionState>,
        Arc<OrderManager>,
        mpsc::UnboundedReceiver<LedgerEvent>,
    ) {
        let gateway: DynOrderGateway = Arc::new(MockOrderGateway::new());
        let position = Arc::new(PositionState::new("BTCUSDT"));
        let orders = Arc::new(OrderManager::new("BTCUSDT", ReconcileConfig::default(), gateway));
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = AccountHandler::new("BTCUSDT", position.clone(), orders.clone(), tx);
        (handler, position, orders, rx)
    }

    fn execution(exec_id: &str) -> TopicMessage {
        topic(
            "execution",
            json!([{"symbol": "BTCUSDT", "execId": exec_id, "orderId": "o1", "side": "Buy",
                    "execPrice": "100", "execQty": "0.5", "execFee": "0.01",
                    "execTime": "1700000000000", "execType": "Trade"}]),
        )
    }

    #[test]
    fn test_market_messages_update_book() {
        let market = Arc::new(MarketState::default());
        let handler = MarketHandler::new("BTCUSDT", market.clone());

        let applied = handler.handle(&topic(
            "orderbook.1.BTCUSDT",
            json!({"s": "BTCUSDT", "b": [["99.9", "1.5"]], "a": [["100.1", "2"]], "u": 1}),
        ));

        assert_eq!(applied, 1);
        let snapshot = market.snapshot().unwrap();
        assert_eq!(snapshot.mid, Price::new(dec!(100)));
    }

    #[test]
    fn test_unknown_public_topic_ignored() {
        let market = Arc::new(MarketState::default());
        let handler = MarketHandler::new("BTCUSDT", market.clone());
        assert_eq!(handler.handle(&topic("liquidation.BTCUSDT", json!({}))), 0);
        assert!(market.snapshot().is_none());
    }

    #[test]
    fn test_fill_applied_once_and_recorded() {
        let (handler, position, _orders, mut ledger) = account();

        handler.handle(&execution("e1"));
        handler.handle(&execution("e1"));

        assert_eq!(position.snapshot().qty, dec!(0.5));
        assert!(matches!(ledger.try_recv(), Ok(LedgerEvent::Fill(_))));
        assert!(ledger.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_order_event_reaches_order_manager() {
        let (handler, _position, orders, mut ledger) = account();
        let request = OrderRequest::reduce_only_market(
            "BTCUSDT",
            QuoteRole::Hedge,
            OrderSide::Sell,
            Size::new(dec!(0.1)),
        );
        let cloid = request.cloid.clone();
        orders.submit_reduce_only(request).await.unwrap();
        assert!(orders.has_reduce_only());

        handler.handle(&topic(
            "order",
            json!([{"symbol": "BTCUSDT", "orderId": "mock-1", "orderLinkId": cloid.as_str(),
                    "side": "Sell", "price": "0", "qty": "0.1", "cumExecQty": "0.1",
                    "orderStatus": "Filled", "reduceOnly": true,
                    "createdTime": "1", "updatedTime": "2"}]),
        ));

        assert!(!orders.has_reduce_only());
        assert!(matches!(ledger.try_recv(), Ok(LedgerEvent::Order(_))));
    }

    #[test]
    fn test_position_mismatch_flags_drift() {
        let (handler, position, _orders, _ledger) = account();
        position.sync_flat();
        assert!(!position.is_stale(Duration::from_secs(30)));

        handler.handle(&topic(
            "position",
            json!([{"symbol": "BTCUSDT", "side": "Buy", "size": "1", "entryPrice": "100",
                    "unrealisedPnl": "0", "cumRealisedPnl": "0"}]),
        ));

        assert!(position.is_stale(Duration::from_secs(30)));
        assert_eq!(position.snapshot().qty, dec!(0));
    }

    #[test]
    fn test_wallet_updates_equity() {
        let (handler, position, _orders, mut ledger) = account();

        handler.handle(&topic(
            "wallet",
            json!([{"accountType": "UNIFIED", "totalEquity": "1000",
                    "totalWalletBalance": "990", "totalAvailableBalance": "500"}]),
        ));

        assert_eq!(position.equity(), Some(dec!(1000)));
        assert!(matches!(ledger.try_recv(), Ok(LedgerEvent::Balance { .. })));
    }

    #[tokio::test]
    async fn test_run_stops_when_queue_closes() {
        let market = Arc::new(MarketState::default());
        let handler = MarketHandler::new("BTCUSDT", market.clone());
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(handler.run(rx));

        tx.send(topic(
            "tickers.BTCUSDT",
            json!({"symbol": "BTCUSDT", "bid1Price": "99", "bid1Size": "1",
                   "ask1Price": "101", "ask1Size": "1"}),
        ))
        .await
        .unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(market.snapshot().unwrap().mid, Price::new(dec!(100)));
    }
}
