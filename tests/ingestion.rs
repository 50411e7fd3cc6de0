mod common;

use std::{sync::Arc, time::Duration};

use alloy::primitives::{U64, U256, address};
use alloy::rpc::types::Log;
use tokio_util::sync::CancellationToken;
use transfer_indexer::test_utils::{
    fakes::MemoryRecordStore,
    fixtures::{rpc_block, transfer_log},
};

use common::{TestHarness, fast_config, harness};

const TOKEN: alloy::primitives::Address = address!("0x00000000000000000000000000000000000000aa");

/// Three transfers spread over blocks 10 and 15.
fn seeded_logs() -> Vec<Log> {
    vec![
        transfer_log(
            TOKEN,
            address!("0x1111111111111111111111111111111111111111"),
            address!("0x2222222222222222222222222222222222222222"),
            U256::from(1_000_000_000_000_000_000u64),
            10,
            0,
        ),
        transfer_log(
            TOKEN,
            address!("0x2222222222222222222222222222222222222222"),
            address!("0x3333333333333333333333333333333333333333"),
            U256::from(5u8),
            10,
            1,
        ),
        transfer_log(
            TOKEN,
            address!("0x3333333333333333333333333333333333333333"),
            address!("0x4444444444444444444444444444444444444444"),
            U256::from(7u8),
            15,
            0,
        ),
    ]
}

fn seed_chain(harness: &TestHarness) {
    harness.asserter.push_success(&U64::from(20));
    harness.asserter.push_success(&seeded_logs());
    // Two distinct blocks appear in the logs, so two header fetches follow.
    harness.asserter.push_success(&rpc_block(10, 1_700_000_000));
    harness.asserter.push_success(&rpc_block(15, 1_700_000_000));
}

async fn run_briefly(harness: &TestHarness) {
    let shutdown = CancellationToken::new();
    let scanner = Arc::clone(&harness.scanner);
    let stopper = shutdown.clone();
    let handle = tokio::spawn(async move { scanner.run(stopper).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();
    handle.await.expect("scanner task panicked").expect("scanner returned an error");
}

#[tokio::test]
async fn ingests_a_seeded_range_end_to_end() {
    let records = Arc::new(MemoryRecordStore::default());
    let harness = harness(Arc::clone(&records), fast_config(10));
    let mut subscription = harness.bus.subscribe();
    seed_chain(&harness);

    run_briefly(&harness).await;

    let stored = records.records();
    assert_eq!(stored.len(), 3);
    // Every record carries its block's timestamp.
    assert!(stored.iter().all(|t| t.timestamp.timestamp() == 1_700_000_000));
    // The whole [10, 20] range was covered in one batch.
    assert_eq!(cursor_of(&harness).await, 20);

    // Live subscribers saw the records in log order.
    for expected_log_index in [0u64, 1, 0] {
        let payload = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("publish timed out")
            .expect("bus closed");
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["log_index"], expected_log_index);
    }
}

async fn cursor_of(harness: &TestHarness) -> u64 {
    use transfer_indexer::CursorBackend;
    harness.durable.last_processed_block().await.unwrap()
}

#[tokio::test]
async fn reingesting_the_same_range_adds_no_records() {
    let records = Arc::new(MemoryRecordStore::default());

    let first = harness(Arc::clone(&records), fast_config(10));
    seed_chain(&first);
    run_briefly(&first).await;
    assert_eq!(records.len(), 3);

    // Fresh scanner, same pre-seeded chain, forced rescan of the range.
    let mut config = fast_config(10);
    config.reset_start_block = true;
    let second = harness(Arc::clone(&records), config);
    seed_chain(&second);
    run_briefly(&second).await;

    assert_eq!(records.len(), 3, "idempotent re-ingestion must absorb duplicates");
    assert_eq!(cursor_of(&second).await, 20);
}

#[tokio::test]
async fn failed_ticks_never_advance_the_cursor() {
    let records = Arc::new(MemoryRecordStore::default());
    let harness = harness(Arc::clone(&records), fast_config(10));

    // The tip is known but every log query fails.
    for _ in 0..8 {
        harness.asserter.push_success(&U64::from(20));
        harness.asserter.push_failure_msg("range too wide");
        harness.asserter.push_failure_msg("range too wide");
    }

    run_briefly(&harness).await;

    assert_eq!(records.len(), 0);
    assert_eq!(cursor_of(&harness).await, 0);
}

#[tokio::test]
async fn cancellation_stops_the_loop_promptly() {
    let records = Arc::new(MemoryRecordStore::default());
    let harness = harness(records, fast_config(10));

    let shutdown = CancellationToken::new();
    let scanner = Arc::clone(&harness.scanner);
    let stopper = shutdown.clone();
    let handle = tokio::spawn(async move { scanner.run(stopper).await });

    shutdown.cancel();
    let joined = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scanner did not stop after cancellation");
    joined.expect("scanner task panicked").expect("scanner returned an error");
}
