//! Event bus behavior through the public API.

use std::time::Duration;

use tokio_stream::StreamExt;
use transfer_indexer::{EventBus, test_utils::fixtures::sample_transfer};

#[tokio::test]
async fn late_subscriber_replays_recent_history_in_order() {
    let bus = EventBus::new(16);
    for log_index in 0..5 {
        bus.publish(&sample_transfer(42, log_index));
    }

    let mut subscription = bus.subscribe();
    for expected in 0..5u64 {
        let payload = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("replay timed out")
            .expect("bus closed");
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["log_index"], expected);
        assert_eq!(value["value"], "1000000000000000000");
    }
}

#[tokio::test]
async fn each_subscriber_gets_its_own_copy() {
    let bus = EventBus::new(8);
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    bus.publish(&sample_transfer(1, 0));

    for subscription in [&mut first, &mut second] {
        let payload = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("delivery timed out")
            .expect("bus closed");
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["block_number"], 1);
    }
}

#[tokio::test]
async fn subscriptions_work_as_streams() {
    let bus = EventBus::new(8);
    let mut stream = bus.subscribe();

    bus.publish(&sample_transfer(3, 0));
    bus.publish(&sample_transfer(3, 1));

    let payload = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("delivery timed out")
        .expect("bus closed");
    let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(value["log_index"], 0);
}

#[tokio::test]
async fn slow_subscriber_loses_records_but_never_blocks_the_publisher() {
    let bus = EventBus::new(1);
    let _subscription = bus.subscribe();

    let publish = tokio::time::timeout(Duration::from_millis(200), async {
        for log_index in 0..50 {
            bus.publish(&sample_transfer(1, log_index));
        }
    });
    publish.await.expect("publish must never block");
    assert_eq!(bus.dropped_count(), 49);
}
