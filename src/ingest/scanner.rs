//! The ingestion driver: polls for new blocks, harvests Transfer logs,
//! enriches them with block timestamps, persists them exactly once, advances
//! the cursor, and fans records out to live subscribers.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use alloy::rpc::types::{Filter, Log};
use futures::StreamExt;
use metrics::{counter, gauge, histogram};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{IndexerError, IndexerResult},
    event_bus::EventBus,
    ingest::{
        batch_size::{BatchSizeConfig, BatchSizer},
        timestamp_cache::BlockTimestampCache,
    },
    models::{Transfer, block_time},
    parser::{TRANSFER_EVENT_TOPIC, parse_transfer_log},
    rpc_pool::EndpointPool,
    store::{CursorStore, RecordStore},
};

/// Upper bound on concurrent header fetches within one tick.
const MAX_HEADER_FETCHES: usize = 5;
/// Deadline for each individual header fetch.
const HEADER_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Outer deadline on a whole tick, so a wedged dependency cannot hang the
/// loop.
const TICK_DEADLINE: Duration = Duration::from_secs(60);

/// Scanner settings. `start_block` only matters on a fresh database or when
/// `reset_start_block` forces a re-scan.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub start_block: u64,
    pub poll_interval: Duration,
    pub block_batch_size: u64,
    pub reset_start_block: bool,
    pub batch: BatchSizeConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval: Duration::from_secs(12),
            block_batch_size: 10,
            reset_start_block: false,
            batch: BatchSizeConfig::default(),
        }
    }
}

enum TickOutcome {
    /// Nothing beyond the tip to process.
    Idle,
    Advanced { next_block: u64 },
    /// The tip query failed; no batch adjustment.
    TipFailed(IndexerError),
    /// A pipeline stage failed; counts against the adaptive batch size.
    Failed(IndexerError),
}

/// The adaptive ingestion loop.
pub struct Scanner {
    pool: Arc<EndpointPool>,
    records: Arc<dyn RecordStore>,
    cursor: CursorStore,
    bus: Option<EventBus>,
    timestamps: BlockTimestampCache,
    batch: Mutex<BatchSizer>,
    filter: Filter,
    config: ScannerConfig,
}

impl Scanner {
    #[must_use]
    pub fn new(
        pool: Arc<EndpointPool>,
        records: Arc<dyn RecordStore>,
        cursor: CursorStore,
        bus: Option<EventBus>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            pool,
            records,
            cursor,
            bus,
            timestamps: BlockTimestampCache::default(),
            batch: Mutex::new(BatchSizer::new(config.block_batch_size, config.batch)),
            filter: Filter::new().event_signature(TRANSFER_EVENT_TOPIC),
            config,
        }
    }

    /// Runs until `shutdown` is cancelled. In-flight RPC work observes
    /// cancellation through its deadlines; the loop itself returns cleanly.
    pub async fn run(&self, shutdown: CancellationToken) -> IndexerResult<()> {
        let mut cursor = self.resume_block().await?;
        info!(start_block = cursor, "starting ingestion");

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("ingestion stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("ingestion stopped");
                    return Ok(());
                }
                outcome = tokio::time::timeout(TICK_DEADLINE, self.tick(cursor)) => {
                    outcome.unwrap_or(TickOutcome::Failed(IndexerError::Timeout))
                }
            };

            match outcome {
                TickOutcome::Idle => {}
                TickOutcome::Advanced { next_block } => {
                    cursor = next_block;
                    self.batch.lock().expect("batch sizer lock poisoned").on_success();
                }
                TickOutcome::TipFailed(err) => {
                    counter!("eth_ingestion_errors_total", "type" => "processing", "kind" => err.kind())
                        .increment(1);
                    error!(error = %err, "failed to fetch chain tip");
                }
                TickOutcome::Failed(err) => {
                    counter!("eth_ingestion_errors_total", "type" => "processing", "kind" => err.kind())
                        .increment(1);
                    error!(error = %err, from_block = cursor, "failed to process blocks");
                    self.batch.lock().expect("batch sizer lock poisoned").on_failure();
                }
            }

            let elapsed = started.elapsed();
            histogram!("eth_transfers_processing_duration_seconds", "operation" => "block_processing")
                .record(elapsed.as_secs_f64());
            if elapsed > self.config.poll_interval {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                    "tick took longer than the poll interval, consider a smaller batch size"
                );
            }
        }
    }

    /// First block to process on startup: `cursor + 1` when resuming, the
    /// configured start block on a fresh database or a forced reset.
    async fn resume_block(&self) -> IndexerResult<u64> {
        if self.config.reset_start_block {
            info!(
                start_block = self.config.start_block,
                "cursor reset requested, ignoring persisted cursor"
            );
            return Ok(self.config.start_block);
        }

        let persisted = self.cursor.read().await?;
        if persisted > 0 {
            info!(last_processed = persisted, "resuming after last processed block");
            Ok(persisted + 1)
        } else {
            Ok(self.config.start_block)
        }
    }

    async fn tick(&self, from_block: u64) -> TickOutcome {
        let tip = match self.pool.tip_number().await {
            Ok(tip) => tip,
            Err(err) => return TickOutcome::TipFailed(err),
        };
        gauge!("current_block_height").set(tip as f64);

        if from_block > tip {
            debug!(cursor = from_block, tip, "no new blocks");
            return TickOutcome::Idle;
        }

        let batch = self.batch.lock().expect("batch sizer lock poisoned").current();
        let to_block = (from_block + batch - 1).min(tip);

        debug!(from_block, to_block, batch, "fetching transfer logs");
        let logs = match self.pool.logs_in_range(from_block, to_block, &self.filter).await {
            Ok(logs) => logs,
            Err(err) => return TickOutcome::Failed(err),
        };

        let records = match self.enrich_and_parse(&logs).await {
            Ok(records) => records,
            Err(err) => return TickOutcome::Failed(err),
        };

        if !records.is_empty() {
            match self.records.bulk_insert(&records).await {
                Ok(inserted) => {
                    counter!("eth_transfers_processed_total", "status" => "success")
                        .increment(records.len() as u64);
                    if (inserted as usize) < records.len() {
                        debug!(
                            batch = records.len(),
                            inserted, "re-ingested duplicates were absorbed"
                        );
                    }
                }
                Err(err) => return TickOutcome::Failed(err),
            }

            let tx_hashes: BTreeSet<String> =
                records.iter().map(|record| record.tx_hash.clone()).collect();
            self.cursor.mark_txs_seen(tx_hashes.into_iter().collect());
        }

        if let Err(err) = self.cursor.write(to_block).await {
            return TickOutcome::Failed(err);
        }
        counter!("eth_blocks_processed_total").increment(to_block - from_block + 1);

        if let Some(bus) = &self.bus {
            for record in &records {
                bus.publish(record);
            }
        }

        if records.is_empty() {
            debug!(from_block, to_block, "no transfers found");
        } else {
            info!(
                transfers = records.len(),
                from_block, to_block, batch, "processed transfer batch"
            );
        }

        TickOutcome::Advanced { next_block: to_block + 1 }
    }

    /// Resolves every distinct block's timestamp (cache first, then a
    /// bounded parallel header fan-out) and parses the logs. Malformed logs
    /// are skipped and counted; a failed header fetch fails the whole tick
    /// so no record is ever written without its block timestamp.
    async fn enrich_and_parse(&self, logs: &[Log]) -> IndexerResult<Vec<Transfer>> {
        let mut timestamps = HashMap::new();
        let mut misses = Vec::new();
        for log in logs {
            let Some(block_number) = log.block_number else { continue };
            if timestamps.contains_key(&block_number) || misses.contains(&block_number) {
                continue;
            }
            match self.timestamps.get(block_number) {
                Some(timestamp) => {
                    timestamps.insert(block_number, timestamp);
                }
                None => misses.push(block_number),
            }
        }

        if !misses.is_empty() {
            debug!(headers = misses.len(), "fetching block headers for timestamps");
            let mut fetches = futures::stream::iter(misses.into_iter().map(|block_number| {
                let pool = Arc::clone(&self.pool);
                async move {
                    match tokio::time::timeout(HEADER_FETCH_TIMEOUT, pool.header_at(block_number))
                        .await
                    {
                        Ok(Ok(block)) => Ok((block_number, block_time(block.header.timestamp))),
                        Ok(Err(err)) => Err(err),
                        Err(_) => Err(IndexerError::Timeout),
                    }
                }
            }))
            .buffer_unordered(MAX_HEADER_FETCHES);

            while let Some(fetched) = fetches.next().await {
                let (block_number, timestamp) = fetched?;
                self.timestamps.insert(block_number, timestamp);
                timestamps.insert(block_number, timestamp);
            }
        }

        let mut records = Vec::with_capacity(logs.len());
        for log in logs {
            let timestamp = log.block_number.and_then(|number| timestamps.get(&number).copied());
            let Some(timestamp) = timestamp else {
                counter!("eth_ingestion_errors_total", "type" => "malformed_log").increment(1);
                warn!(tx_hash = ?log.transaction_hash, "skipping log without a block number");
                continue;
            };

            match parse_transfer_log(log, timestamp) {
                Ok(record) => records.push(record),
                Err(err) => {
                    counter!("eth_ingestion_errors_total", "type" => "malformed_log").increment(1);
                    warn!(
                        error = %err,
                        tx_hash = ?log.transaction_hash,
                        "skipping malformed transfer log"
                    );
                }
            }
        }
        Ok(records)
    }
}
