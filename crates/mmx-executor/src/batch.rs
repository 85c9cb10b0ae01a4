//! Chunked submission through the order gateway.
//!
//! Requests are split by the gateway's batch limit. A request-level failure
//! is fanned out to every item of that chunk so callers always get one
//! result per input, in input order.

use mmx_core::OrderRequest;
use mmx_exchange::{CancelRequest, ItemResult, OrderGateway, PlaceAck};
use tracing::{debug, warn};

/// Send cancels in batch-limit chunks.
pub async fn send_cancels(
    gateway: &dyn OrderGateway,
    cancels: Vec<CancelRequest>,
) -> Vec<(CancelRequest, ItemResult<()>)> {
    let limit = gateway.batch_limit().max(1);
    let mut out = Vec::with_capacity(cancels.len());

    let mut iter = cancels.into_iter().peekable();
    while iter.peek().is_some() {
        let chunk: Vec<CancelRequest> = iter.by_ref().take(limit).collect();
        debug!(count = chunk.len(), "Sending cancel batch");
        match gateway.cancel_batch(chunk.clone()).await {
            Ok(results) => out.extend(zip_results(chunk, results)),
            Err(e) => {
                warn!(error = %e, count = chunk.len(), "Cancel batch failed");
                out.extend(chunk.into_iter().map(|c| (c, Err(e.clone()))));
            }
        }
    }
    out
}

/// Send placements in batch-limit chunks.
pub async fn send_placements(
    gateway: &dyn OrderGateway,
    orders: Vec<OrderRequest>,
) -> Vec<(OrderRequest, ItemResult<PlaceAck>)> {
    let limit = gateway.batch_limit().max(1);
    let mut out = Vec::with_capacity(orders.len());

    let mut iter = orders.into_iter().peekable();
    while iter.peek().is_some() {
        let chunk: Vec<OrderRequest> = iter.by_ref().take(limit).collect();
        debug!(count = chunk.len(), "Sending order batch");
        match gateway.place_batch(chunk.clone()).await {
            Ok(results) => out.extend(zip_results(chunk, results)),
            Err(e) => {
                warn!(error = %e, count = chunk.len(), "Order batch failed");
                out.extend(chunk.into_iter().map(|o| (o, Err(e.clone()))));
            }
        }
    }
    out
}

/// Pair requests with results. A short response marks the missing tail as
/// transient failures.
fn zip_results<R, T>(requests: Vec<R>, results: Vec<ItemResult<T>>) -> Vec<(R, ItemResult<T>)> {
    let mut results = results.into_iter();
    requests
        .into_iter()
        .map(|req| {
            let res = results.next().unwrap_or_else(|| {
                Err(mmx_exchange::ExchangeError::Transient(
                    "missing item in batch response".to_string(),
                ))
            });
            (req, res)
        })
        .collect()
}
