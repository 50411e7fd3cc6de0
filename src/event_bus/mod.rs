//! Non-blocking fan-out of freshly persisted transfers.
//!
//! Records are serialized once at publish time and delivered to every
//! subscriber as opaque JSON bytes. A publisher never blocks: a subscriber
//! whose channel is full simply misses that record. While nobody is
//! subscribed, records accumulate in a bounded replay buffer that is drained
//! into the next subscriber so late joiners still see recent history.

mod ring_buffer;

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;
use tracing::{debug, error};

use crate::{event_bus::ring_buffer::RingBuffer, models::Transfer};

/// Deadline for each replayed record delivered to a fresh subscriber. A
/// consumer that fails to drain within this window is abandoned for replay
/// rather than holding a task hostage.
const REPLAY_DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared pub/sub handle. Cheap to clone; all clones publish into the same
/// subscriber set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusState>>,
    buffer_size: usize,
}

struct BusState {
    subscribers: HashMap<u64, mpsc::Sender<Arc<[u8]>>>,
    replay: RingBuffer<Arc<[u8]>>,
    next_id: u64,
    dropped: u64,
}

impl EventBus {
    /// Creates a bus whose replay buffer and per-subscriber channels hold up
    /// to `buffer_size` records.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            inner: Arc::new(Mutex::new(BusState {
                subscribers: HashMap::new(),
                replay: RingBuffer::new(buffer_size),
                next_id: 0,
                dropped: 0,
            })),
            buffer_size,
        }
    }

    /// Publishes a transfer to every subscriber without ever blocking.
    ///
    /// With no subscribers connected the serialized record lands in the
    /// replay buffer (oldest evicted on overflow). A full subscriber channel
    /// drops the record for that subscriber only.
    pub fn publish(&self, transfer: &Transfer) {
        let payload: Arc<[u8]> = match serde_json::to_vec(transfer) {
            Ok(bytes) => bytes.into(),
            Err(err) => {
                error!(error = %err, "failed to serialize transfer for streaming");
                return;
            }
        };

        let mut state = self.inner.lock().expect("event bus lock poisoned");

        if state.subscribers.is_empty() {
            state.replay.push(payload);
            return;
        }

        let mut closed = Vec::new();
        let mut dropped = 0u64;
        for (id, sender) in &state.subscribers {
            match sender.try_send(Arc::clone(&payload)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    debug!(subscriber = id, "subscriber channel full, dropping record");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        state.dropped += dropped;
        for id in closed {
            state.subscribers.remove(&id);
        }
    }

    /// Registers a new subscriber and asynchronously replays buffered
    /// records into it, oldest first.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer_size);

        let (id, backlog) = {
            let mut state = self.inner.lock().expect("event bus lock poisoned");
            let id = state.next_id;
            state.next_id += 1;
            let backlog: Vec<Arc<[u8]>> = state.replay.iter().cloned().collect();
            state.subscribers.insert(id, sender.clone());
            (id, backlog)
        };

        if !backlog.is_empty() {
            tokio::spawn(async move {
                for record in backlog {
                    match tokio::time::timeout(REPLAY_DELIVERY_TIMEOUT, sender.send(record)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => return,
                        Err(_) => {
                            debug!(subscriber = id, "replay delivery timed out, abandoning");
                            return;
                        }
                    }
                }
            });
        }

        Subscription { id, receiver, inner: Arc::clone(&self.inner) }
    }

    /// Number of currently connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("event bus lock poisoned").subscribers.len()
    }

    /// Total records dropped because a subscriber could not keep up.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().expect("event bus lock poisoned").dropped
    }
}

/// A live stream of serialized transfer records. The subscription is removed
/// from the bus when this handle is dropped.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Arc<[u8]>>,
    inner: Arc<Mutex<BusState>>,
}

impl Subscription {
    /// Waits for the next record. Returns `None` once the bus is gone and
    /// the channel is drained.
    pub async fn recv(&mut self) -> Option<Arc<[u8]>> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<[u8]>> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Arc<[u8]>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.lock() {
            state.subscribers.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::sample_transfer;

    fn payload_value(bytes: &[u8]) -> serde_json::Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn replays_buffered_records_to_late_subscriber_in_order() {
        let bus = EventBus::new(16);
        for log_index in 0..5 {
            bus.publish(&sample_transfer(10, log_index));
        }

        let mut subscription = bus.subscribe();
        for expected in 0..5u64 {
            let record = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
                .await
                .expect("replay timed out")
                .expect("bus closed");
            assert_eq!(payload_value(&record)["log_index"], expected);
        }
    }

    #[tokio::test]
    async fn publish_never_blocks_on_slow_subscriber() {
        let bus = EventBus::new(2);
        let mut subscription = bus.subscribe();

        // Channel capacity is 2; the rest must be dropped, not block.
        for log_index in 0..10 {
            bus.publish(&sample_transfer(1, log_index));
        }

        assert_eq!(bus.dropped_count(), 8);
        assert!(subscription.try_recv().is_some());
        assert!(subscription.try_recv().is_some());
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn drop_unsubscribes_and_rebuffers() {
        let bus = EventBus::new(4);
        let subscription = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(bus.subscriber_count(), 0);

        // With nobody listening, records go back to the replay buffer.
        bus.publish(&sample_transfer(2, 0));
        let mut late = bus.subscribe();
        let record = tokio::time::timeout(Duration::from_secs(1), late.recv())
            .await
            .expect("replay timed out")
            .expect("bus closed");
        assert_eq!(payload_value(&record)["block_number"], 2);
    }

    #[tokio::test]
    async fn replay_buffer_drops_oldest_on_overflow() {
        let bus = EventBus::new(3);
        for log_index in 0..5 {
            bus.publish(&sample_transfer(1, log_index));
        }

        let mut subscription = bus.subscribe();
        let first = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("replay timed out")
            .expect("bus closed");
        assert_eq!(payload_value(&first)["log_index"], 2);
    }
}
