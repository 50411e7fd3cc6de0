use std::{sync::Arc, time::Duration};

use alloy::providers::mock::Asserter;
use transfer_indexer::{
    BatchSizeConfig, CircuitBreakerConfig, CursorStore, EventBus, EndpointPool, Scanner,
    ScannerConfig,
    test_utils::{
        fakes::{MemoryCursorBackend, MemoryCursorCache, MemoryRecordStore},
        fixtures::mocked_endpoint,
    },
};

pub struct TestHarness {
    pub scanner: Arc<Scanner>,
    pub asserter: Asserter,
    pub records: Arc<MemoryRecordStore>,
    pub durable: Arc<MemoryCursorBackend>,
    pub bus: EventBus,
}

/// A scanner over one mocked endpoint, in-memory stores, and a live bus.
pub fn harness(records: Arc<MemoryRecordStore>, config: ScannerConfig) -> TestHarness {
    let asserter = Asserter::new();
    let pool = Arc::new(EndpointPool::new(vec![mocked_endpoint(
        "mock",
        10,
        10_000,
        CircuitBreakerConfig::default(),
        &asserter,
    )]));
    let durable = Arc::new(MemoryCursorBackend::new(0));
    let cursor = CursorStore::new(
        Arc::clone(&durable) as _,
        Some(Arc::new(MemoryCursorCache::default()) as _),
    );
    let bus = EventBus::new(64);

    let scanner = Arc::new(Scanner::new(
        pool,
        Arc::clone(&records) as _,
        cursor,
        Some(bus.clone()),
        config,
    ));

    TestHarness { scanner, asserter, records, durable, bus }
}

pub fn fast_config(start_block: u64) -> ScannerConfig {
    ScannerConfig {
        start_block,
        poll_interval: Duration::from_millis(20),
        block_batch_size: 100,
        reset_start_block: false,
        batch: BatchSizeConfig::default(),
    }
}
