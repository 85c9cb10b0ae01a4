//! Order lifecycle types.
//!
//! `Order` is the engine's view of a single exchange order. Its status only
//! moves when the exchange says so: a REST acknowledgement, a private-stream
//! order event, or an open-orders resync.

use serde::{Deserialize, Serialize};

use crate::order::{ClientOrderId, OrderSide, OrderType, TimeInForce};
use crate::{Price, Size};

// ============================================================================
// Roles and Status
// ============================================================================

/// Why an order exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteRole {
    /// Resting buy quote.
    Bid,
    /// Resting sell quote.
    Ask,
    /// Reduce-only inventory hedge.
    Hedge,
    /// Reduce-only order bringing position back under threshold.
    Rebalance,
    /// Reduce-only panic exit at the stop.
    Exit,
}

impl QuoteRole {
    /// Resting quotes are managed by reconcile; the rest are fire-and-track.
    #[must_use]
    pub fn is_quote(&self) -> bool {
        matches!(self, Self::Bid | Self::Ask)
    }

    /// Side a quote of this role sits on. Reduce-only roles carry their side
    /// on the request.
    #[must_use]
    pub fn quote_side(&self) -> Option<OrderSide> {
        match self {
            Self::Bid => Some(OrderSide::Buy),
            Self::Ask => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuoteRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
            Self::Hedge => write!(f, "hedge"),
            Self::Rebalance => write!(f, "rebalance"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// State of an order in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Submitted, not yet acknowledged.
    #[default]
    New,
    /// Acknowledged and resting on the book.
    Working,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Returns true if the order is still active (can be cancelled).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::New | Self::Working | Self::PartiallyFilled)
    }

    /// Map the exchange `orderStatus` string.
    ///
    /// Conditional-order states are not used by this engine and map to
    /// `None`.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "Created" => Some(Self::New),
            "New" => Some(Self::Working),
            "PartiallyFilled" => Some(Self::PartiallyFilled),
            "Filled" => Some(Self::Filled),
            "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => Some(Self::Cancelled),
            "Rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Order to be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub cloid: ClientOrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Limit price; `None` for market orders.
    pub price: Option<Price>,
    pub qty: Size,
    pub tif: TimeInForce,
    pub reduce_only: bool,
    pub role: QuoteRole,
}

impl OrderRequest {
    /// Post-only limit quote.
    #[must_use]
    pub fn quote(symbol: &str, role: QuoteRole, side: OrderSide, price: Price, qty: Size) -> Self {
        Self {
            cloid: ClientOrderId::new(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            qty,
            tif: TimeInForce::PostOnly,
            reduce_only: false,
            role,
        }
    }

    /// Reduce-only market order.
    #[must_use]
    pub fn reduce_only_market(symbol: &str, role: QuoteRole, side: OrderSide, qty: Size) -> Self {
        Self {
            cloid: ClientOrderId::new(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            price: None,
            qty,
            tif: TimeInForce::ImmediateOrCancel,
            reduce_only: true,
            role,
        }
    }

    /// Reduce-only IOC limit order priced through the touch.
    #[must_use]
    pub fn reduce_only_limit(
        symbol: &str,
        role: QuoteRole,
        side: OrderSide,
        price: Price,
        qty: Size,
    ) -> Self {
        Self {
            cloid: ClientOrderId::new(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            qty,
            tif: TimeInForce::ImmediateOrCancel,
            reduce_only: true,
            role,
        }
    }
}

// ============================================================================
// Tracked Orders
// ============================================================================

/// Tracked order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange order id, known once acknowledged.
    pub order_id: Option<String>,
    pub cloid: ClientOrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Price,
    pub qty: Size,
    pub filled_qty: Size,
    pub role: QuoteRole,
    pub reduce_only: bool,
    pub status: OrderStatus,
    /// Creation timestamp (Unix milliseconds).
    pub created_at: u64,
    /// Last update timestamp (Unix milliseconds).
    pub updated_at: u64,
    /// A cancel has been sent and not yet confirmed.
    #[serde(default)]
    pub cancel_pending: bool,
}

impl Order {
    /// Track a request that is about to be submitted.
    #[must_use]
    pub fn from_request(request: &OrderRequest, now_ms: u64) -> Self {
        Self {
            order_id: None,
            cloid: request.cloid.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            price: request.price.unwrap_or(Price::ZERO),
            qty: request.qty,
            filled_qty: Size::ZERO,
            role: request.role,
            reduce_only: request.reduce_only,
            status: OrderStatus::New,
            created_at: now_ms,
            updated_at: now_ms,
            cancel_pending: false,
        }
    }

    /// Unfilled quantity.
    #[must_use]
    pub fn remaining(&self) -> Size {
        if self.filled_qty >= self.qty {
            Size::ZERO
        } else {
            self.qty - self.filled_qty
        }
    }

    /// Age in milliseconds at `now_ms`.
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }

    /// Apply an exchange update. Terminal orders are never revived.
    pub fn apply_update(&mut self, update: &OrderUpdate) {
        if self.status.is_terminal() {
            return;
        }
        if self.order_id.is_none() {
            self.order_id = Some(update.order_id.clone());
        }
        if update.cum_exec_qty > self.filled_qty {
            self.filled_qty = update.cum_exec_qty;
        }
        self.status = update.status;
        self.updated_at = update.updated_at.max(self.updated_at);
        if self.status.is_terminal() {
            self.cancel_pending = false;
        }
    }
}

/// Exchange-side view of an order, from the private `order` topic or the
/// open-orders endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub cloid: Option<ClientOrderId>,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Price,
    pub qty: Size,
    pub cum_exec_qty: Size,
    pub status: OrderStatus,
    pub reduce_only: bool,
    /// Exchange update time (Unix milliseconds).
    pub updated_at: u64,
}

impl OrderUpdate {
    /// Build a tracked order for an exchange order we did not place in this
    /// session.
    #[must_use]
    pub fn into_order(self, created_at: u64) -> Order {
        let role = match (self.reduce_only, self.side) {
            (true, _) => QuoteRole::Hedge,
            (false, OrderSide::Buy) => QuoteRole::Bid,
            (false, OrderSide::Sell) => QuoteRole::Ask,
        };
        Order {
            order_id: Some(self.order_id),
            cloid: self
                .cloid
                .unwrap_or_else(|| ClientOrderId::from_string(String::new())),
            symbol: self.symbol,
            side: self.side,
            price: self.price,
            qty: self.qty,
            filled_qty: self.cum_exec_qty,
            role,
            reduce_only: self.reduce_only,
            status: self.status,
            created_at,
            updated_at: self.updated_at,
            cancel_pending: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn update(status: OrderStatus, cum: Size) -> OrderUpdate {
        OrderUpdate {
            order_id: "ex-1".to_string(),
            cloid: None,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            price: Price::new(dec!(100)),
            qty: Size::new(dec!(0.01)),
            cum_exec_qty: cum,
            status,
            reduce_only: false,
            updated_at: 2_000,
        }
    }

    #[test]
    fn test_status_wire_mapping() {
        assert_eq!(OrderStatus::from_wire("New"), Some(OrderStatus::Working));
        assert_eq!(
            OrderStatus::from_wire("PartiallyFilledCanceled"),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(OrderStatus::from_wire("Untriggered"), None);
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::New.is_active());
    }

    #[test]
    fn test_order_from_request_starts_new() {
        let req = OrderRequest::quote(
            "BTCUSDT",
            QuoteRole::Bid,
            OrderSide::Buy,
            Price::new(dec!(99.9)),
            Size::new(dec!(0.01)),
        );
        let order = Order::from_request(&req, 1_000);

        assert_eq!(order.status, OrderStatus::New);
        assert!(order.order_id.is_none());
        assert_eq!(order.remaining(), Size::new(dec!(0.01)));
        assert_eq!(order.age_ms(1_500), 500);
    }

    #[test]
    fn test_apply_update_tracks_fills_and_never_revives() {
        let req = OrderRequest::quote(
            "BTCUSDT",
            QuoteRole::Bid,
            OrderSide::Buy,
            Price::new(dec!(100)),
            Size::new(dec!(0.01)),
        );
        let mut order = Order::from_request(&req, 1_000);

        order.apply_update(&update(OrderStatus::PartiallyFilled, Size::new(dec!(0.004))));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.order_id.as_deref(), Some("ex-1"));
        assert_eq!(order.remaining(), Size::new(dec!(0.006)));

        order.apply_update(&update(OrderStatus::Cancelled, Size::new(dec!(0.004))));
        assert_eq!(order.status, OrderStatus::Cancelled);

        order.apply_update(&update(OrderStatus::Working, Size::new(dec!(0.004))));
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_adopted_order_role() {
        let order = update(OrderStatus::Working, Size::ZERO).into_order(5);
        assert_eq!(order.role, QuoteRole::Bid);
        assert_eq!(order.created_at, 5);
    }
}
