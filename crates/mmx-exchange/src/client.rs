//! Signed REST client.
//!
//! Every call goes through the same path: rate limiter, signing, timeout,
//! `retCode` classification and the retry policy. Endpoint helpers below
//! only build parameters and decode `result`.

use crate::error::{classify_ret_code, ExchangeError, ExchangeResult};
use crate::gateway::{BoxFuture, CancelRequest, ItemResult, OrderGateway, PlaceAck};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::signer::Credentials;
use crate::types::{
    parse_decimal, ApiEnvelope, RawOrder, RawPosition, RawWallet, WalletBalance,
};
use mmx_core::{
    unix_ms, Candle, ExchangePosition, InstrumentSpec, OrderRequest, OrderType, OrderUpdate,
    Price, Size,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// REST client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL, e.g. `https://api.bybit.com`.
    pub base_url: String,
    /// Product category (`linear`).
    pub category: String,
    /// Server-side acceptance window for signed requests.
    pub recv_window_ms: u64,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Requests allowed per rate-limit window.
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub retry: RetryPolicy,
    /// Maximum items per batch order request.
    pub batch_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bybit.com".to_string(),
            category: "linear".to_string(),
            recv_window_ms: 5000,
            timeout: Duration::from_secs(10),
            rate_limit_requests: 10,
            rate_limit_window: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            batch_limit: 10,
        }
    }
}

/// Signed REST client.
pub struct ExchangeClient {
    http: Client,
    config: ClientConfig,
    credentials: Credentials,
    limiter: Arc<RateLimiter>,
}

impl ExchangeClient {
    /// Create a new client.
    pub fn new(config: ClientConfig, credentials: Credentials) -> ExchangeResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::HttpClient(format!("Failed to create HTTP client: {e}")))?;
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_requests,
            config.rate_limit_window,
        ));

        Ok(Self {
            http,
            config,
            credentials,
            limiter,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Signed GET with retry.
    pub async fn get(&self, path: &str, params: &[(&str, String)]) -> ExchangeResult<ApiEnvelope> {
        self.config
            .retry
            .run(path, || self.send_get(path, params))
            .await
    }

    /// Signed POST with retry.
    pub async fn post(&self, path: &str, body: &Value) -> ExchangeResult<ApiEnvelope> {
        self.config
            .retry
            .run(path, || self.send_post(path, body))
            .await
    }

    async fn send_get(&self, path: &str, params: &[(&str, String)]) -> ExchangeResult<ApiEnvelope> {
        self.limiter.acquire().await;

        let mut sorted = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let endpoint = format!("{}{}", self.config.base_url, path);
        let url = if sorted.is_empty() {
            Url::parse(&endpoint)
        } else {
            Url::parse_with_params(&endpoint, sorted.iter())
        }
        .map_err(|e| ExchangeError::HttpClient(format!("Invalid URL {endpoint}: {e}")))?;
        let query = url.query().unwrap_or_default().to_string();

        debug!(path, query = %query, "GET");
        let request = self.signed(self.http.get(url), &query)?;
        self.finish(path, request).await
    }

    async fn send_post(&self, path: &str, body: &Value) -> ExchangeResult<ApiEnvelope> {
        self.limiter.acquire().await;

        let payload = body.to_string();
        debug!(path, "POST");
        let request = self
            .http
            .post(format!("{}{}", self.config.base_url, path))
            .header(CONTENT_TYPE, "application/json")
            .body(payload.clone());
        let request = self.signed(request, &payload)?;
        self.finish(path, request).await
    }

    fn signed(
        &self,
        request: reqwest::RequestBuilder,
        payload: &str,
    ) -> ExchangeResult<reqwest::RequestBuilder> {
        let timestamp = unix_ms();
        let signature =
            self.credentials
                .rest_signature(timestamp, self.config.recv_window_ms, payload)?;
        Ok(request
            .header("X-BAPI-API-KEY", self.credentials.api_key())
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.config.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-SIGN-TYPE", "2"))
    }

    async fn finish(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> ExchangeResult<ApiEnvelope> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = ExchangeError::from_http_status(status.as_u16(), &body);
            warn!(path, status = status.as_u16(), kind = err.kind(), "HTTP error");
            return Err(err);
        }

        let envelope: ApiEnvelope =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Validation {
                code: -1,
                message: format!("Failed to parse response from {path}: {e}"),
            })?;

        if let Some(err) = classify_ret_code(envelope.ret_code, &envelope.ret_msg) {
            warn!(
                path,
                ret_code = envelope.ret_code,
                ret_msg = %envelope.ret_msg,
                kind = err.kind(),
                "Exchange rejected request"
            );
            return Err(err);
        }
        Ok(envelope)
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    fn order_item(&self, order: &OrderRequest) -> Value {
        let mut item = json!({
            "symbol": order.symbol,
            "side": order.side.to_string(),
            "orderType": order.order_type.to_string(),
            "qty": order.qty.to_string(),
            "timeInForce": order.tif.to_string(),
            "orderLinkId": order.cloid.as_str(),
            "reduceOnly": order.reduce_only,
        });
        if let (OrderType::Limit, Some(price)) = (order.order_type, order.price) {
            item["price"] = Value::String(price.to_string());
        }
        item
    }

    fn cancel_item(&self, cancel: &CancelRequest) -> Value {
        match &cancel.order_id {
            Some(order_id) => json!({"symbol": cancel.symbol, "orderId": order_id}),
            None => json!({"symbol": cancel.symbol, "orderLinkId": cancel.cloid.as_str()}),
        }
    }

    /// Place a single order.
    pub async fn create_order(&self, order: &OrderRequest) -> ExchangeResult<PlaceAck> {
        let mut body = self.order_item(order);
        body["category"] = Value::String(self.config.category.clone());

        let env = self.post("/v5/order/create", &body).await?;
        let order_id = env
            .result
            .get("orderId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if order_id.is_empty() {
            return Err(ExchangeError::Validation {
                code: -1,
                message: "create response missing orderId".to_string(),
            });
        }
        info!(
            order_id = %order_id,
            cloid = %order.cloid,
            side = %order.side,
            qty = %order.qty,
            role = %order.role,
            "Order placed"
        );
        Ok(PlaceAck {
            order_id,
            cloid: order.cloid.clone(),
        })
    }

    /// Place a batch of orders. Per-item failures do not fail the batch.
    pub async fn create_batch(
        &self,
        orders: &[OrderRequest],
    ) -> ExchangeResult<Vec<ItemResult<PlaceAck>>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        self.check_batch_len(orders.len())?;

        let body = json!({
            "category": self.config.category,
            "request": orders.iter().map(|o| self.order_item(o)).collect::<Vec<_>>(),
        });
        let env = self.post("/v5/order/create-batch", &body).await?;
        let list = env.result_list();
        let statuses = env.item_statuses();

        Ok(orders
            .iter()
            .enumerate()
            .map(|(i, order)| {
                item_error(statuses.get(i))?;
                let order_id = list
                    .get(i)
                    .and_then(|v| v.get("orderId"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if order_id.is_empty() {
                    return Err(ExchangeError::Validation {
                        code: -1,
                        message: format!("batch item {i} missing orderId"),
                    });
                }
                Ok(PlaceAck {
                    order_id: order_id.to_string(),
                    cloid: order.cloid.clone(),
                })
            })
            .collect())
    }

    /// Cancel a batch of orders. Per-item failures do not fail the batch.
    pub async fn cancel_batch_orders(
        &self,
        cancels: &[CancelRequest],
    ) -> ExchangeResult<Vec<ItemResult<()>>> {
        if cancels.is_empty() {
            return Ok(Vec::new());
        }
        self.check_batch_len(cancels.len())?;

        let body = json!({
            "category": self.config.category,
            "request": cancels.iter().map(|c| self.cancel_item(c)).collect::<Vec<_>>(),
        });
        let env = self.post("/v5/order/cancel-batch", &body).await?;
        let statuses = env.item_statuses();

        Ok((0..cancels.len())
            .map(|i| item_error(statuses.get(i)))
            .collect())
    }

    /// Cancel a single order.
    pub async fn cancel_order(&self, cancel: &CancelRequest) -> ExchangeResult<()> {
        let mut body = self.cancel_item(cancel);
        body["category"] = Value::String(self.config.category.clone());
        self.post("/v5/order/cancel", &body).await?;
        Ok(())
    }

    /// Cancel every open order on `symbol`.
    pub async fn cancel_all_orders(&self, symbol: &str) -> ExchangeResult<()> {
        let body = json!({"category": self.config.category, "symbol": symbol});
        self.post("/v5/order/cancel-all", &body).await?;
        info!(symbol, "Cancelled all open orders");
        Ok(())
    }

    /// Open orders on `symbol`.
    pub async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OrderUpdate>> {
        let env = self
            .get(
                "/v5/order/realtime",
                &[
                    ("category", self.config.category.clone()),
                    ("symbol", symbol.to_string()),
                    ("limit", "50".to_string()),
                ],
            )
            .await?;

        let mut orders = Vec::new();
        for item in env.result_list() {
            let raw: RawOrder = match serde_json::from_value(item.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed open order");
                    continue;
                }
            };
            if let Some(update) = raw.into_update() {
                orders.push(update);
            }
        }
        Ok(orders)
    }

    // ------------------------------------------------------------------
    // Account
    // ------------------------------------------------------------------

    /// Position on `symbol`.
    pub async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<ExchangePosition>> {
        let env = self
            .get(
                "/v5/position/list",
                &[
                    ("category", self.config.category.clone()),
                    ("symbol", symbol.to_string()),
                ],
            )
            .await?;

        let Some(item) = env.result_list().first() else {
            return Ok(None);
        };
        let raw: RawPosition =
            serde_json::from_value(item.clone()).map_err(|e| ExchangeError::Validation {
                code: -1,
                message: format!("Failed to parse position: {e}"),
            })?;
        Ok(raw.into_position())
    }

    /// Unified account balances.
    pub async fn get_wallet_balance(&self) -> ExchangeResult<WalletBalance> {
        let env = self
            .get(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string())],
            )
            .await?;

        let raw: RawWallet = env
            .result_list()
            .first()
            .map(|item| serde_json::from_value(item.clone()))
            .transpose()
            .map_err(|e| ExchangeError::Validation {
                code: -1,
                message: format!("Failed to parse wallet balance: {e}"),
            })?
            .unwrap_or_default();
        Ok(raw.into_balance())
    }

    /// Set symmetric leverage. "Not modified" counts as success.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let body = json!({
            "category": self.config.category,
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        self.post("/v5/position/set-leverage", &body).await?;
        info!(symbol, leverage, "Leverage set");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Market data
    // ------------------------------------------------------------------

    /// Tick size and quantity bounds for `symbol`.
    pub async fn get_instrument(&self, symbol: &str) -> ExchangeResult<InstrumentSpec> {
        let env = self
            .get(
                "/v5/market/instruments-info",
                &[
                    ("category", self.config.category.clone()),
                    ("symbol", symbol.to_string()),
                ],
            )
            .await?;

        let item = env
            .result_list()
            .first()
            .ok_or_else(|| ExchangeError::Validation {
                code: -1,
                message: format!("instrument {symbol} not found"),
            })?;
        let field = |section: &str, key: &str| -> ExchangeResult<rust_decimal::Decimal> {
            item.get(section)
                .and_then(|s| s.get(key))
                .and_then(Value::as_str)
                .and_then(parse_decimal)
                .ok_or_else(|| ExchangeError::Validation {
                    code: -1,
                    message: format!("instrument {symbol} missing {section}.{key}"),
                })
        };

        Ok(InstrumentSpec {
            symbol: symbol.to_string(),
            tick_size: Price::new(field("priceFilter", "tickSize")?),
            qty_step: Size::new(field("lotSizeFilter", "qtyStep")?),
            min_qty: Size::new(field("lotSizeFilter", "minOrderQty")?),
            max_qty: Size::new(field("lotSizeFilter", "maxOrderQty")?),
        })
    }

    /// Recent candles, oldest first.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        let env = self
            .get(
                "/v5/market/kline",
                &[
                    ("category", self.config.category.clone()),
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let mut candles: Vec<Candle> = env
            .result_list()
            .iter()
            .filter_map(|row| {
                let cols = row.as_array()?;
                let num = |i: usize| cols.get(i)?.as_str().and_then(parse_decimal);
                Some(Candle {
                    start_ms: cols.first()?.as_str()?.parse().ok()?,
                    open: Price::new(num(1)?),
                    high: Price::new(num(2)?),
                    low: Price::new(num(3)?),
                    close: Price::new(num(4)?),
                })
            })
            .collect();
        candles.sort_by_key(|c| c.start_ms);
        Ok(candles)
    }

    fn check_batch_len(&self, len: usize) -> ExchangeResult<()> {
        if len > self.config.batch_limit {
            return Err(ExchangeError::Validation {
                code: -1,
                message: format!(
                    "batch of {len} exceeds limit {}",
                    self.config.batch_limit
                ),
            });
        }
        Ok(())
    }
}

fn item_error(status: Option<&(i64, String)>) -> ItemResult<()> {
    match status {
        Some((code, msg)) => match classify_ret_code(*code, msg) {
            Some(err) => Err(err),
            None => Ok(()),
        },
        None => Ok(()),
    }
}

impl OrderGateway for ExchangeClient {
    fn place_batch(
        &self,
        orders: Vec<OrderRequest>,
    ) -> BoxFuture<'_, ExchangeResult<Vec<ItemResult<PlaceAck>>>> {
        Box::pin(async move { self.create_batch(&orders).await })
    }

    fn cancel_batch(
        &self,
        cancels: Vec<CancelRequest>,
    ) -> BoxFuture<'_, ExchangeResult<Vec<ItemResult<()>>>> {
        Box::pin(async move { self.cancel_batch_orders(&cancels).await })
    }

    fn place_order(&self, order: OrderRequest) -> BoxFuture<'_, ExchangeResult<PlaceAck>> {
        Box::pin(async move { self.create_order(&order).await })
    }

    fn cancel_all(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move { self.cancel_all_orders(&symbol).await })
    }

    fn open_orders(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<Vec<OrderUpdate>>> {
        Box::pin(async move { self.get_open_orders(&symbol).await })
    }

    fn position(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<Option<ExchangePosition>>> {
        Box::pin(async move { self.get_position(&symbol).await })
    }

    fn batch_limit(&self) -> usize {
        self.config.batch_limit
    }
}
