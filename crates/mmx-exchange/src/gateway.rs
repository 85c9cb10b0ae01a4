//! Order gateway seam.
//!
//! The order manager and control loop talk to the exchange only through
//! `OrderGateway`, so tests can swap in `MockOrderGateway`.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use mmx_core::{ClientOrderId, ExchangePosition, OrderRequest, OrderUpdate};
use parking_lot::Mutex;

use crate::error::{ExchangeError, ExchangeResult};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Per-item outcome inside a batch response.
pub type ItemResult<T> = Result<T, ExchangeError>;

/// Acknowledgement for an accepted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceAck {
    pub order_id: String,
    pub cloid: ClientOrderId,
}

/// Cancel target. The exchange id is used when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub symbol: String,
    pub order_id: Option<String>,
    pub cloid: ClientOrderId,
}

/// Order routing to the exchange.
pub trait OrderGateway: Send + Sync {
    /// Place up to `batch_limit()` orders in one request. Results are in
    /// request order.
    fn place_batch(
        &self,
        orders: Vec<OrderRequest>,
    ) -> BoxFuture<'_, ExchangeResult<Vec<ItemResult<PlaceAck>>>>;

    /// Cancel up to `batch_limit()` orders in one request. Results are in
    /// request order.
    fn cancel_batch(
        &self,
        cancels: Vec<CancelRequest>,
    ) -> BoxFuture<'_, ExchangeResult<Vec<ItemResult<()>>>>;

    /// Place a single order (reduce-only exits).
    fn place_order(&self, order: OrderRequest) -> BoxFuture<'_, ExchangeResult<PlaceAck>>;

    /// Cancel every open order on the symbol.
    fn cancel_all(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<()>>;

    /// Open orders on the symbol.
    fn open_orders(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<Vec<OrderUpdate>>>;

    /// Current position, `None` if the exchange reports nothing for the symbol.
    fn position(&self, symbol: String) -> BoxFuture<'_, ExchangeResult<Option<ExchangePosition>>>;

    /// Maximum items per batch request.
    fn batch_limit(&self) -> usize;
}

/// Arc wrapper for OrderGateway trait objects.
pub type DynOrderGateway = Arc<dyn OrderGateway>;

/// Mock gateway for testing.
///
/// Accepts everything by default and hands out sequential order ids.
#[derive(Debug)]
pub struct MockOrderGateway {
    placed: Mutex<Vec<OrderRequest>>,
    cancelled: Mutex<Vec<CancelRequest>>,
    cancel_all_calls: AtomicU32,
    next_id: AtomicU64,
    /// Error returned for the whole next batch/single placement.
    place_error: Mutex<Option<ExchangeError>>,
    /// Error returned for the whole next cancel batch.
    cancel_error: Mutex<Option<ExchangeError>>,
    /// Remaining single placements to fail.
    place_order_failures: AtomicU32,
    /// Per-item rejection applied to every item of a batch.
    reject_items: Mutex<Option<ExchangeError>>,
    open_orders: Mutex<Vec<OrderUpdate>>,
    position: Mutex<Option<ExchangePosition>>,
    batch_limit: usize,
}

impl Default for MockOrderGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOrderGateway {
    pub fn new() -> Self {
        Self::with_batch_limit(10)
    }

    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            placed: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            cancel_all_calls: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            place_error: Mutex::new(None),
            cancel_error: Mutex::new(None),
            place_order_failures: AtomicU32::new(0),
            reject_items: Mutex::new(None),
            open_orders: Mutex::new(Vec::new()),
            position: Mutex::new(None),
            batch_limit,
        }
    }

    /// Fail the next placement call as a whole.
    pub fn set_place_error(&self, err: Option<ExchangeError>) {
        *self.place_error.lock() = err;
    }

    /// Fail the next cancel batch as a whole.
    pub fn set_cancel_error(&self, err: Option<ExchangeError>) {
        *self.cancel_error.lock() = err;
    }

    /// Reject every item of subsequent batches with `err`.
    pub fn set_reject_items(&self, err: Option<ExchangeError>) {
        *self.reject_items.lock() = err;
    }

    /// Fail the next `n` single-order placements with a transient error.
    pub fn fail_next_place_orders(&self, n: u32) {
        self.place_order_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_open_orders(&self, orders: Vec<OrderUpdate>) {
        *self.open_orders.lock() = orders;
    }

    pub fn set_position(&self, position: Option<ExchangePosition>) {
        *self.position.lock() = position;
    }

    /// Every order submitted, batch or single.
    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<CancelRequest> {
        self.cancelled.lock().clone()
    }

    pub fn cancel_all_calls(&self) -> u32 {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.placed.lock().clear();
        self.cancelled.lock().clear();
    }

    fn ack(&self, order: &OrderRequest) -> PlaceAck {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        PlaceAck {
            order_id: format!("mock-{id}"),
            cloid: order.cloid.clone(),
        }
    }
}

impl OrderGateway for MockOrderGateway {
    fn place_batch(
        &self,
        orders: Vec<OrderRequest>,
    ) -> BoxFuture<'_, ExchangeResult<Vec<ItemResult<PlaceAck>>>> {
        Box::pin(async move {
            if let Some(err) = self.place_error.lock().take() {
                return Err(err);
            }
            let reject = self.reject_items.lock().clone();
            let mut results = Vec::with_capacity(orders.len());
            for order in orders {
                results.push(match &reject {
                    Some(err) => Err(err.clone()),
                    None => Ok(self.ack(&order)),
                });
                self.placed.lock().push(order);
            }
            Ok(results)
        })
    }

    fn cancel_batch(
        &self,
        cancels: Vec<CancelRequest>,
    ) -> BoxFuture<'_, ExchangeResult<Vec<ItemResult<()>>>> {
        Box::pin(async move {
            if let Some(err) = self.cancel_error.lock().take() {
                return Err(err);
            }
            let results = cancels.iter().map(|_| Ok(())).collect();
            self.cancelled.lock().extend(cancels);
            Ok(results)
        })
    }

    fn place_order(&self, order: OrderRequest) -> BoxFuture<'_, ExchangeResult<PlaceAck>> {
        Box::pin(async move {
            if let Some(err) = self.place_error.lock().take() {
                return Err(err);
            }
            let remaining = self.place_order_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.place_order_failures
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(ExchangeError::Transient("mock placement failure".into()));
            }
            let ack = self.ack(&order);
            self.placed.lock().push(order);
            Ok(ack)
        })
    }

    fn cancel_all(&self, _symbol: String) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move {
            self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn open_orders(&self, _symbol: String) -> BoxFuture<'_, ExchangeResult<Vec<OrderUpdate>>> {
        Box::pin(async move { Ok(self.open_orders.lock().clone()) })
    }

    fn position(&self, _symbol: String) -> BoxFuture<'_, ExchangeResult<Option<ExchangePosition>>> {
        Box::pin(async move { Ok(self.position.lock().clone()) })
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}
