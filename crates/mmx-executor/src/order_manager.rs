//! Working-order set and its reconcile against quote targets.
//!
//! The set lives under one `parking_lot::Mutex` that is never held across
//! an `.await`. Every reconcile runs in two phases:
//!
//! 1. cancels: decide under the lock, mark cancel-pending, send, then apply
//!    the acks under the lock;
//! 2. placements: decide under the lock, reserve each slot by inserting the
//!    order as `New`, send, then apply the acks under the lock.
//!
//! Reserving before I/O keeps the per-side count correct even when a stream
//! event for the new order arrives before its REST ack.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mmx_core::{unix_ms, ClientOrderId, Order, OrderRequest, OrderStatus, OrderUpdate, QuoteRole};
use mmx_exchange::{CancelRequest, DynOrderGateway, ExchangeError, PlaceAck};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::batch::{send_cancels, send_placements};
use crate::error::{ExecutorError, ExecutorResult};
use crate::reconcile::{plan_cancels, plan_placements, QuoteTarget, ReconcileConfig, ReconcileReport};

#[derive(Debug, Default)]
struct Inner {
    orders: HashMap<ClientOrderId, Order>,
    last_confirmed: Option<Instant>,
}

impl Inner {
    fn find_mut(&mut self, update: &OrderUpdate) -> Option<&mut Order> {
        let key = match &update.cloid {
            Some(cloid) if self.orders.contains_key(cloid) => Some(cloid.clone()),
            _ => self
                .orders
                .iter()
                .find(|(_, o)| o.order_id.as_deref() == Some(update.order_id.as_str()))
                .map(|(k, _)| k.clone()),
        }?;
        self.orders.get_mut(&key)
    }

    fn remove_terminal(&mut self) {
        self.orders.retain(|_, o| !o.status.is_terminal());
    }
}

/// Key for an exchange order we did not place in this session.
fn adopted_cloid(update: &OrderUpdate) -> ClientOrderId {
    match &update.cloid {
        Some(cloid) if !cloid.as_str().is_empty() => cloid.clone(),
        _ => ClientOrderId::from_string(format!("ext_{}", update.order_id)),
    }
}

/// Owner of the working-order set.
pub struct OrderManager {
    symbol: String,
    config: ReconcileConfig,
    gateway: DynOrderGateway,
    inner: Mutex<Inner>,
}

impl OrderManager {
    pub fn new(symbol: impl Into<String>, config: ReconcileConfig, gateway: DynOrderGateway) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            gateway,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Bring the working quotes in line with `targets`.
    pub async fn reconcile(&self, targets: &[QuoteTarget], now_ms: u64) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.cancel_phase(targets, now_ms, &mut report).await;
        self.place_phase(targets, now_ms, &mut report).await;

        if report.cancelled + report.placed + report.rejected + report.cancel_failed > 0 {
            info!(
                cancelled = report.cancelled,
                cancel_failed = report.cancel_failed,
                placed = report.placed,
                rejected = report.rejected,
                skipped = report.skipped_at_capacity,
                "Reconcile complete"
            );
        }
        report
    }

    async fn cancel_phase(&self, targets: &[QuoteTarget], now_ms: u64, report: &mut ReconcileReport) {
        let requests: Vec<CancelRequest> = {
            let mut inner = self.inner.lock();
            let plan = plan_cancels(inner.orders.values(), targets, &self.config, now_ms);
            let mut requests = Vec::with_capacity(plan.len());
            for (cloid, reason) in plan {
                if let Some(order) = inner.orders.get_mut(&cloid) {
                    debug!(cloid = %cloid, side = %order.side, price = %order.price, %reason, "Cancelling quote");
                    order.cancel_pending = true;
                    requests.push(CancelRequest {
                        symbol: order.symbol.clone(),
                        order_id: order.order_id.clone(),
                        cloid,
                    });
                }
            }
            requests
        };
        self.apply_cancels(requests, report).await;
    }

    async fn apply_cancels(&self, requests: Vec<CancelRequest>, report: &mut ReconcileReport) {
        if requests.is_empty() {
            return;
        }

        let results = send_cancels(self.gateway.as_ref(), requests).await;

        let mut inner = self.inner.lock();
        for (req, result) in results {
            match result {
                Ok(()) => {
                    inner.orders.remove(&req.cloid);
                    report.cancelled += 1;
                }
                Err(e) if e.is_order_not_found() => {
                    // already gone on the exchange
                    inner.orders.remove(&req.cloid);
                    report.cancelled += 1;
                }
                Err(e) => {
                    warn!(cloid = %req.cloid, error = %e, "Cancel failed");
                    if let Some(order) = inner.orders.get_mut(&req.cloid) {
                        order.cancel_pending = false;
                    }
                    report.cancel_failed += 1;
                    report.errors.push(e);
                }
            }
        }
    }

    async fn place_phase(&self, targets: &[QuoteTarget], now_ms: u64, report: &mut ReconcileReport) {
        let requests: Vec<OrderRequest> = {
            let mut inner = self.inner.lock();
            let (to_place, skipped) = plan_placements(inner.orders.values(), targets, &self.config);
            report.skipped_at_capacity += skipped;
            to_place
                .into_iter()
                .map(|t| {
                    let req = OrderRequest::quote(&self.symbol, t.role, t.side, t.price, t.qty);
                    inner
                        .orders
                        .insert(req.cloid.clone(), Order::from_request(&req, now_ms));
                    req
                })
                .collect()
        };
        if requests.is_empty() {
            return;
        }

        let results = send_placements(self.gateway.as_ref(), requests).await;

        let mut inner = self.inner.lock();
        let mut any_ack = false;
        for (req, result) in results {
            match result {
                Ok(ack) => {
                    any_ack = true;
                    report.placed += 1;
                    Self::apply_ack(&mut inner, &req.cloid, ack);
                }
                Err(e) => {
                    log_rejection(&req, &e);
                    inner.orders.remove(&req.cloid);
                    report.rejected += 1;
                    report.errors.push(e);
                }
            }
        }
        if any_ack {
            inner.last_confirmed = Some(Instant::now());
        }
    }

    fn apply_ack(inner: &mut Inner, cloid: &ClientOrderId, ack: PlaceAck) {
        if let Some(order) = inner.orders.get_mut(cloid) {
            order.order_id = Some(ack.order_id);
            // a stream event may already have moved it past New
            if order.status == OrderStatus::New {
                order.status = OrderStatus::Working;
            }
            order.updated_at = unix_ms();
        }
    }

    /// Submit a reduce-only order outside the quoting slots.
    pub async fn submit_reduce_only(&self, request: OrderRequest) -> ExecutorResult<PlaceAck> {
        if !request.reduce_only {
            return Err(ExecutorError::InvalidOrder(format!(
                "{} order {} is not reduce-only",
                request.role, request.cloid
            )));
        }
        let cloid = request.cloid.clone();
        self.inner
            .lock()
            .orders
            .insert(cloid.clone(), Order::from_request(&request, unix_ms()));

        info!(
            cloid = %cloid,
            role = %request.role,
            side = %request.side,
            qty = %request.qty,
            "Submitting reduce-only order"
        );
        match self.gateway.place_order(request.clone()).await {
            Ok(ack) => {
                let mut inner = self.inner.lock();
                Self::apply_ack(&mut inner, &cloid, ack.clone());
                inner.last_confirmed = Some(Instant::now());
                Ok(ack)
            }
            Err(e) => {
                log_rejection(&request, &e);
                self.inner.lock().orders.remove(&cloid);
                Err(e.into())
            }
        }
    }

    /// Cancel working hedge and rebalance orders so an exit can take the
    /// full position. Exit orders are left alone.
    pub async fn cancel_reduce_only(&self) -> ReconcileReport {
        let requests: Vec<CancelRequest> = {
            let mut inner = self.inner.lock();
            inner
                .orders
                .values_mut()
                .filter(|o| {
                    o.reduce_only
                        && o.role != QuoteRole::Exit
                        && o.status.is_active()
                        && !o.cancel_pending
                })
                .map(|o| {
                    o.cancel_pending = true;
                    CancelRequest {
                        symbol: o.symbol.clone(),
                        order_id: o.order_id.clone(),
                        cloid: o.cloid.clone(),
                    }
                })
                .collect()
        };
        let mut report = ReconcileReport::default();
        if !requests.is_empty() {
            info!(count = requests.len(), "Cancelling reduce-only orders");
        }
        self.apply_cancels(requests, &mut report).await;
        report
    }

    /// Apply a private-stream order event. Unknown active orders are
    /// adopted; terminal orders leave the set.
    pub fn on_order_update(&self, update: &OrderUpdate) {
        if update.symbol != self.symbol {
            return;
        }
        let mut inner = self.inner.lock();
        inner.last_confirmed = Some(Instant::now());

        match inner.find_mut(update) {
            Some(order) => {
                let before = order.status;
                order.apply_update(update);
                if before != order.status {
                    debug!(
                        cloid = %order.cloid,
                        from = ?before,
                        to = ?order.status,
                        filled = %order.filled_qty,
                        "Order status changed"
                    );
                }
            }
            None if update.status.is_active() => {
                let cloid = adopted_cloid(update);
                info!(order_id = %update.order_id, cloid = %cloid, "Adopting unknown order");
                let mut order = update.clone().into_order(unix_ms());
                order.cloid = cloid.clone();
                inner.orders.insert(cloid, order);
            }
            None => {}
        }
        inner.remove_terminal();
    }

    /// Cancel everything on the symbol and clear the local set.
    pub async fn cancel_all(&self) -> ExecutorResult<()> {
        self.gateway.cancel_all(self.symbol.clone()).await?;
        let mut inner = self.inner.lock();
        let count = inner.orders.len();
        inner.orders.clear();
        inner.last_confirmed = Some(Instant::now());
        info!(count, "All orders cancelled");
        Ok(())
    }

    /// Replace the local set with the exchange's open orders. Roles and
    /// creation times of known orders are kept.
    pub fn resync(&self, open_orders: Vec<OrderUpdate>) {
        let mut inner = self.inner.lock();
        let mut previous = std::mem::take(&mut inner.orders);
        let now = unix_ms();

        for update in open_orders
            .into_iter()
            .filter(|u| u.symbol == self.symbol && u.status.is_active())
        {
            let cloid = adopted_cloid(&update);
            let order = match previous.remove(&cloid) {
                Some(mut known) => {
                    known.apply_update(&update);
                    known.cancel_pending = false;
                    known
                }
                None => {
                    let mut order = update.into_order(now);
                    order.cloid = cloid.clone();
                    order
                }
            };
            inner.orders.insert(cloid, order);
        }

        if !previous.is_empty() {
            debug!(dropped = previous.len(), "Resync dropped orders unknown to the exchange");
        }
        inner.last_confirmed = Some(Instant::now());
        info!(open = inner.orders.len(), "Order state resynced");
    }

    /// Fetch open orders and resync.
    pub async fn resync_from_exchange(&self) -> ExecutorResult<usize> {
        let open = self.gateway.open_orders(self.symbol.clone()).await?;
        self.resync(open);
        Ok(self.inner.lock().orders.len())
    }

    /// Load persisted orders. They stay unconfirmed until the next resync.
    pub fn restore(&self, orders: Vec<Order>) {
        let mut inner = self.inner.lock();
        inner.orders = orders
            .into_iter()
            .filter(|o| o.symbol == self.symbol && o.status.is_active())
            .map(|o| (o.cloid.clone(), o))
            .collect();
        inner.last_confirmed = None;
    }

    /// Working orders, oldest first.
    pub fn snapshot(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.inner.lock().orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.cloid.as_str().cmp(b.cloid.as_str()))
        });
        orders
    }

    /// Active quotes on a side, cancel-pending included.
    pub fn outstanding(&self, side: mmx_core::OrderSide) -> usize {
        self.inner
            .lock()
            .orders
            .values()
            .filter(|o| o.role.is_quote() && o.side == side && o.status.is_active())
            .count()
    }

    /// True if a reduce-only order of any role is working.
    pub fn has_reduce_only(&self) -> bool {
        self.inner
            .lock()
            .orders
            .values()
            .any(|o| o.reduce_only && o.status.is_active())
    }

    /// True if an exit order is working.
    pub fn has_exit(&self) -> bool {
        self.inner
            .lock()
            .orders
            .values()
            .any(|o| o.role == QuoteRole::Exit && o.status.is_active())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Never confirmed, or not confirmed within `window`.
    pub fn is_stale(&self, window: Duration) -> bool {
        self.inner
            .lock()
            .last_confirmed
            .map_or(true, |t| t.elapsed() > window)
    }
}

fn log_rejection(req: &OrderRequest, e: &ExchangeError) {
    match e {
        ExchangeError::InsufficientBalance { .. } => {
            warn!(cloid = %req.cloid, role = %req.role, error = %e, "Order skipped: insufficient balance")
        }
        ExchangeError::Validation { .. } => {
            warn!(cloid = %req.cloid, role = %req.role, error = %e, "Order rejected")
        }
        _ => warn!(cloid = %req.cloid, role = %req.role, error = %e, "Order submission failed"),
    }
}
