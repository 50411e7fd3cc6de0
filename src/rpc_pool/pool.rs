use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use alloy::{
    providers::{Provider, RootProvider},
    rpc::types::{Block, Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::{
    error::{IndexerError, IndexerResult},
    rpc_pool::endpoint::Endpoint,
};

/// Multi-endpoint RPC pool with weighted selection, per-endpoint circuit
/// breaking and transparent failover.
///
/// Endpoints are held sorted by descending weight; each call round-robins
/// over the currently selectable endpoints that can serve the request's
/// block span. A failed call records against that endpoint's breaker and the
/// pool moves on to the next candidate, making up to `2 × endpoints`
/// attempts in total so a freshly recovered endpoint gets a second look.
pub struct EndpointPool {
    endpoints: Vec<Arc<Endpoint>>,
    // Round-robin position; held only across the selection decision, never
    // across an RPC call.
    cursor: Mutex<usize>,
}

enum Selection {
    Candidate(usize),
    /// Nothing is selectable; the highest-weight endpoint that can serve the
    /// range is used anyway.
    LastResort(usize),
    CycleExhausted,
    Unserviceable,
}

impl EndpointPool {
    /// Builds a pool from endpoints, sorting them by descending weight.
    #[must_use]
    pub fn new(mut endpoints: Vec<Endpoint>) -> Self {
        endpoints.sort_by(|a, b| b.weight().cmp(&a.weight()));
        Self { endpoints: endpoints.into_iter().map(Arc::new).collect(), cursor: Mutex::new(0) }
    }

    /// Endpoints in selection order, for monitoring.
    #[must_use]
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Highest block number known to the first endpoint that answers.
    pub async fn tip_number(&self) -> IndexerResult<u64> {
        self.invoke("eth_blockNumber", 0, |provider| async move {
            provider.get_block_number().await
        })
        .await
    }

    /// Block `number` without transaction bodies; enough for header fields.
    pub async fn header_at(&self, number: u64) -> IndexerResult<Block> {
        let block = self
            .invoke("eth_getBlockByNumber", 0, move |provider| async move {
                provider.get_block_by_number(number.into()).await
            })
            .await?;
        block.ok_or(IndexerError::BlockNotFound(number))
    }

    /// Block `number` with full transaction bodies.
    pub async fn block_at(&self, number: u64) -> IndexerResult<Block> {
        let block = self
            .invoke("eth_getBlockByNumber", 0, move |provider| async move {
                provider.get_block_by_number(number.into()).full().await
            })
            .await?;
        block.ok_or(IndexerError::BlockNotFound(number))
    }

    /// Logs matching `filter` within `[from_block, to_block]`, with the
    /// block span as the selection cost hint: endpoints whose `max_range` is
    /// smaller than the span are never asked.
    pub async fn logs_in_range(
        &self,
        from_block: u64,
        to_block: u64,
        filter: &Filter,
    ) -> IndexerResult<Vec<Log>> {
        let span = to_block.saturating_sub(from_block) + 1;
        let filter = filter.clone().from_block(from_block).to_block(to_block);
        self.invoke("eth_getLogs", span, move |provider| {
            let filter = filter.clone();
            async move { provider.get_logs(&filter).await }
        })
        .await
    }

    /// Runs `op` against endpoints until one succeeds.
    ///
    /// Selection walks round-robin over selectable endpoints whose
    /// `max_range` covers `cost_hint`, never repeating an endpoint within an
    /// attempt cycle. After every candidate of a cycle has failed, a second
    /// cycle starts fresh so endpoints that recovered meanwhile are retried
    /// once. With nothing selectable at all, the highest-weight
    /// range-capable endpoint is tried as a last resort.
    async fn invoke<T, F, Fut>(&self, method: &'static str, cost_hint: u64, op: F) -> IndexerResult<T>
    where
        F: Fn(RootProvider) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let max_attempts = self.endpoints.len() * 2;
        let mut attempts = 0usize;
        let mut last_error: Option<IndexerError> = None;

        'cycles: for _ in 0..2 {
            let mut attempted = vec![false; self.endpoints.len()];

            while attempts < max_attempts {
                let index = match self.select(cost_hint, &attempted) {
                    Selection::Candidate(index) => index,
                    Selection::LastResort(index) => {
                        warn!(
                            endpoint = self.endpoints[index].name(),
                            method, "no selectable endpoint, using highest-weight as last resort"
                        );
                        index
                    }
                    Selection::CycleExhausted => continue 'cycles,
                    Selection::Unserviceable => break 'cycles,
                };

                attempted[index] = true;
                attempts += 1;
                let endpoint = &self.endpoints[index];

                counter!(
                    "rpc_requests_total",
                    "endpoint" => endpoint.name().to_owned(),
                    "method" => method
                )
                .increment(1);

                let started = Instant::now();
                let outcome = tokio::time::timeout(endpoint.timeout(), op(endpoint.provider())).await;
                histogram!(
                    "rpc_request_duration_seconds",
                    "endpoint" => endpoint.name().to_owned(),
                    "method" => method
                )
                .record(started.elapsed().as_secs_f64());

                match outcome {
                    Ok(Ok(value)) => {
                        endpoint.record_success();
                        return Ok(value);
                    }
                    Ok(Err(err)) => {
                        endpoint.record_failure();
                        counter!(
                            "rpc_errors_total",
                            "endpoint" => endpoint.name().to_owned(),
                            "method" => method
                        )
                        .increment(1);
                        debug!(endpoint = endpoint.name(), method, error = %err, "rpc call failed, failing over");
                        last_error = Some(IndexerError::Provider {
                            endpoint: endpoint.name().to_owned(),
                            source: Arc::new(err),
                        });
                    }
                    Err(_elapsed) => {
                        endpoint.record_failure();
                        counter!(
                            "rpc_errors_total",
                            "endpoint" => endpoint.name().to_owned(),
                            "method" => method
                        )
                        .increment(1);
                        debug!(endpoint = endpoint.name(), method, "rpc call timed out, failing over");
                        last_error = Some(IndexerError::Timeout);
                    }
                }
            }

            break;
        }

        match last_error {
            Some(last) => Err(IndexerError::AllEndpointsFailed { attempts, last: Box::new(last) }),
            None => Err(IndexerError::RangeUnserviceable(cost_hint)),
        }
    }

    fn select(&self, cost_hint: u64, attempted: &[bool]) -> Selection {
        let capable =
            |endpoint: &Arc<Endpoint>| cost_hint == 0 || endpoint.max_range() >= cost_hint;

        let candidates: Vec<usize> = self
            .endpoints
            .iter()
            .enumerate()
            .filter(|(index, endpoint)| {
                !attempted[*index] && capable(*endpoint) && endpoint.is_selectable()
            })
            .map(|(index, _)| index)
            .collect();

        if !candidates.is_empty() {
            let mut cursor = self.cursor.lock().expect("pool cursor lock poisoned");
            let chosen = candidates[*cursor % candidates.len()];
            *cursor = cursor.wrapping_add(1);
            return Selection::Candidate(chosen);
        }

        let any_selectable =
            self.endpoints.iter().any(|endpoint| capable(endpoint) && endpoint.is_selectable());
        if any_selectable {
            // Everything selectable has been attempted this cycle.
            return Selection::CycleExhausted;
        }

        // Endpoints are weight-sorted, so the first unattempted range-capable
        // one is the highest-weight fallback.
        match self
            .endpoints
            .iter()
            .enumerate()
            .find(|(index, endpoint)| !attempted[*index] && capable(*endpoint))
        {
            Some((index, _)) => Selection::LastResort(index),
            None if self.endpoints.iter().any(capable) => Selection::CycleExhausted,
            None => Selection::Unserviceable,
        }
    }
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPool").field("endpoints", &self.endpoints).finish_non_exhaustive()
    }
}
