//! ERC-20 Transfer ingestion core.
//!
//! Continuously harvests `Transfer` events from an EVM chain through a pool
//! of failover RPC endpoints, normalizes them into canonical records,
//! persists them durably with exactly-once semantics, and fans freshly
//! persisted records out to live subscribers.

pub mod config;
pub mod event_bus;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod rpc_pool;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod error;

pub use error::{IndexerError, IndexerResult, MalformedLog};
pub use event_bus::{EventBus, Subscription};
pub use ingest::{BatchSizeConfig, Scanner, ScannerConfig};
pub use models::{ProcessedBlock, Transfer, TransferAggregate, TransferQuery};
pub use parser::{EVENT_SIGNATURE_TRANSFER, TRANSFER_EVENT_TOPIC, parse_transfer_log};
pub use rpc_pool::{
    CircuitBreakerConfig, Endpoint, EndpointConfig, EndpointPool, EndpointPoolBuilder, HealthState,
};
pub use store::{CursorBackend, CursorCache, CursorStore, RecordStore};
