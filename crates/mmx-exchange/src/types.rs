//! Wire types shared by the REST client and the private stream parser.
//!
//! The exchange sends numbers as strings and uses the same item layout for
//! REST lists and private topic payloads, so both paths decode through
//! these structs.

use mmx_core::{
    ClientOrderId, ExchangePosition, Fill, OrderSide, OrderStatus, OrderUpdate, Price, Size,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Standard response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub ret_ext_info: Value,
    #[serde(default)]
    pub time: u64,
}

impl ApiEnvelope {
    /// `result.list` as a slice; empty when absent.
    pub fn result_list(&self) -> &[Value] {
        self.result
            .get("list")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `(code, msg)` pairs from `retExtInfo.list`, one per batch item.
    pub fn item_statuses(&self) -> Vec<(i64, String)> {
        self.ret_ext_info
            .get("list")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        let code = item.get("code").and_then(Value::as_i64).unwrap_or(0);
                        let msg = item
                            .get("msg")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        (code, msg)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse an exchange decimal string. Empty strings are zero.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return Some(Decimal::ZERO);
    }
    Decimal::from_str(s).ok()
}

fn parse_ms(s: &str) -> u64 {
    s.parse().unwrap_or_default()
}

/// Order item (`/v5/order/realtime` list and the `order` topic).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawOrder {
    pub order_id: String,
    pub order_link_id: String,
    pub symbol: String,
    pub side: String,
    pub price: String,
    pub qty: String,
    pub cum_exec_qty: String,
    pub order_status: String,
    pub reduce_only: bool,
    pub created_time: String,
    pub updated_time: String,
}

impl RawOrder {
    /// Convert to an `OrderUpdate`. `None` for unsupported statuses or
    /// malformed numbers.
    pub fn into_update(self) -> Option<OrderUpdate> {
        let side = OrderSide::from_wire(&self.side)?;
        let status = OrderStatus::from_wire(&self.order_status)?;
        let cloid = if self.order_link_id.is_empty() {
            None
        } else {
            Some(ClientOrderId::from_string(self.order_link_id))
        };
        Some(OrderUpdate {
            order_id: self.order_id,
            cloid,
            symbol: self.symbol,
            side,
            price: Price::new(parse_decimal(&self.price)?),
            qty: Size::new(parse_decimal(&self.qty)?),
            cum_exec_qty: Size::new(parse_decimal(&self.cum_exec_qty)?),
            status,
            reduce_only: self.reduce_only,
            updated_at: parse_ms(&self.updated_time).max(parse_ms(&self.created_time)),
        })
    }
}

/// Execution item (`execution` topic).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawExecution {
    pub exec_id: String,
    pub order_id: String,
    pub order_link_id: String,
    pub symbol: String,
    pub side: String,
    pub exec_price: String,
    pub exec_qty: String,
    pub exec_fee: String,
    pub exec_time: String,
    pub exec_type: String,
}

impl RawExecution {
    /// Convert to a `Fill`. Funding and other non-trade executions yield
    /// `None`.
    pub fn into_fill(self) -> Option<Fill> {
        if !self.exec_type.is_empty() && self.exec_type != "Trade" {
            return None;
        }
        let qty = parse_decimal(&self.exec_qty)?;
        if qty.is_zero() {
            return None;
        }
        Some(Fill {
            side: OrderSide::from_wire(&self.side)?,
            price: Price::new(parse_decimal(&self.exec_price)?),
            qty: Size::new(qty),
            fee: parse_decimal(&self.exec_fee).unwrap_or_default(),
            exec_time: parse_ms(&self.exec_time),
            exec_id: self.exec_id,
            order_id: self.order_id,
            symbol: self.symbol,
        })
    }
}

/// Position item (`/v5/position/list` and the `position` topic).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPosition {
    pub symbol: String,
    pub side: String,
    pub size: String,
    /// REST spelling.
    pub avg_price: Option<String>,
    /// Stream spelling.
    pub entry_price: Option<String>,
    pub unrealised_pnl: String,
    pub cum_realised_pnl: String,
}

impl RawPosition {
    pub fn into_position(self) -> Option<ExchangePosition> {
        let size = parse_decimal(&self.size)?;
        let qty = match OrderSide::from_wire(&self.side) {
            Some(side) => size * side.sign(),
            None => Decimal::ZERO,
        };
        let entry = self
            .avg_price
            .as_deref()
            .or(self.entry_price.as_deref())
            .and_then(parse_decimal)
            .unwrap_or_default();
        Some(ExchangePosition {
            symbol: self.symbol,
            qty,
            avg_entry: if qty.is_zero() {
                Price::ZERO
            } else {
                Price::new(entry)
            },
            unrealized_pnl: parse_decimal(&self.unrealised_pnl).unwrap_or_default(),
            cum_realized_pnl: parse_decimal(&self.cum_realised_pnl).unwrap_or_default(),
        })
    }
}

/// Wallet item (`/v5/account/wallet-balance` and the `wallet` topic).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawWallet {
    pub account_type: String,
    pub total_equity: String,
    pub total_wallet_balance: String,
    pub total_available_balance: String,
}

/// Account balances in quote currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub total_equity: Decimal,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
}

impl RawWallet {
    pub fn into_balance(self) -> WalletBalance {
        WalletBalance {
            total_equity: parse_decimal(&self.total_equity).unwrap_or_default(),
            wallet_balance: parse_decimal(&self.total_wallet_balance).unwrap_or_default(),
            available_balance: parse_decimal(&self.total_available_balance).unwrap_or_default(),
        }
    }
}
