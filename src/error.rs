use std::sync::Arc;

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

/// Top-level error for the ingestion service. Variants map to subsystems.
#[derive(Error, Debug, Clone)]
pub enum IndexerError {
    /// A single endpoint's RPC call failed. Consumed by the endpoint's
    /// circuit breaker and used by the pool as a failover signal.
    #[error("endpoint {endpoint}: rpc call failed: {source}")]
    Provider {
        endpoint: String,
        #[source]
        source: Arc<RpcError<TransportErrorKind>>,
    },

    /// Every endpoint in the pool failed for one logical operation.
    #[error("all endpoints failed after {attempts} attempts: {last}")]
    AllEndpointsFailed { attempts: usize, last: Box<IndexerError> },

    /// No configured endpoint accepts a log query spanning this many blocks.
    #[error("no endpoint accepts a block range of {0}")]
    RangeUnserviceable(u64),

    #[error("operation timed out")]
    Timeout,

    #[error("block {0} not found")]
    BlockNotFound(u64),

    /// A single log violated the Transfer parse contract. Never fatal to a
    /// batch; the offending log is skipped and counted.
    #[error("malformed transfer log: {0}")]
    MalformedLog(#[from] MalformedLog),

    /// The durable store rejected a write. Duplicate-key conflicts are
    /// absorbed by the store itself and never surface through this variant.
    #[error("durable store error: {0}")]
    DurableWrite(#[source] Arc<sqlx::Error>),

    /// The cache layer is unreachable. Callers degrade to the durable store;
    /// this never aborts ingestion.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("service is shutting down")]
    Cancelled,
}

/// A convenience `Result` alias used throughout the crate.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Ways a raw log can violate the ERC-20 Transfer parse contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedLog {
    #[error("expected 3 topics, got {0}")]
    TopicCount(usize),

    #[error("topic0 is not the ERC-20 Transfer signature")]
    NotTransfer,

    #[error("expected a 32-byte data payload, got {0} bytes")]
    DataLength(usize),

    #[error("log is missing its {0}")]
    MissingField(&'static str),
}

impl IndexerError {
    /// Stable, low-cardinality name of this error's variant. Used as the
    /// `kind` label when failures are counted in metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            IndexerError::Provider { .. } => "provider",
            IndexerError::AllEndpointsFailed { .. } => "all_endpoints_failed",
            IndexerError::RangeUnserviceable(_) => "range_unserviceable",
            IndexerError::Timeout => "timeout",
            IndexerError::BlockNotFound(_) => "block_not_found",
            IndexerError::MalformedLog(_) => "malformed_log",
            IndexerError::DurableWrite(_) => "durable_write",
            IndexerError::CacheUnavailable(_) => "cache_unavailable",
            IndexerError::InvalidConfig(_) => "invalid_config",
            IndexerError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_metric_labels() {
        assert_eq!(IndexerError::Timeout.kind(), "timeout");
        assert_eq!(IndexerError::CacheUnavailable("down".to_owned()).kind(), "cache_unavailable");
        assert_eq!(IndexerError::MalformedLog(MalformedLog::NotTransfer).kind(), "malformed_log");
    }
}
