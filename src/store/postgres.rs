//! PostgreSQL durable store: transfers, cursor checkpoints, and the query
//! surface consumed by the HTTP facade.

use std::{sync::Arc, time::Duration};

use alloy::primitives::U256;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Postgres, QueryBuilder, Row,
    postgres::{PgPoolOptions, PgRow},
};
use tracing::{debug, info};

use crate::{
    error::{IndexerError, IndexerResult},
    models::{TimeRange, Transfer, TransferAggregate, TransferQuery},
    store::{CursorBackend, RecordStore},
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transfers (
  event_signature TEXT NOT NULL,
  token TEXT NOT NULL,
  "from" TEXT NOT NULL,
  "to" TEXT NOT NULL,
  value NUMERIC NOT NULL,
  value_decimal DOUBLE PRECISION NOT NULL,
  block_number BIGINT NOT NULL,
  tx_hash TEXT NOT NULL,
  tx_index BIGINT NOT NULL,
  log_index BIGINT NOT NULL,
  timestamp TIMESTAMPTZ NOT NULL,
  created_at TIMESTAMPTZ NOT NULL,
  CONSTRAINT transfers_tx_hash_log_index_key UNIQUE (tx_hash, log_index)
);

CREATE INDEX IF NOT EXISTS transfers_token_block_idx ON transfers (token, block_number DESC);
CREATE INDEX IF NOT EXISTS transfers_from_idx ON transfers ("from");
CREATE INDEX IF NOT EXISTS transfers_to_idx ON transfers ("to");
CREATE INDEX IF NOT EXISTS transfers_timestamp_idx ON transfers (timestamp DESC);
CREATE INDEX IF NOT EXISTS transfers_signature_block_idx
  ON transfers (event_signature, block_number DESC);

CREATE TABLE IF NOT EXISTS processed_blocks (
  block_number BIGINT PRIMARY KEY,
  processed_at TIMESTAMPTZ NOT NULL
);
"#;

const INSERT_TRANSFER: &str = r#"
INSERT INTO transfers
  (event_signature, token, "from", "to", value, value_decimal,
   block_number, tx_hash, tx_index, log_index, timestamp, created_at)
VALUES ($1, $2, $3, $4, $5::numeric, $6, $7, $8, $9, $10, $11, $12)
ON CONFLICT (tx_hash, log_index) DO NOTHING
"#;

const SELECT_COLUMNS: &str = r#"
SELECT event_signature, token, "from", "to", value::text AS value, value_decimal,
       block_number, tx_hash, tx_index, log_index, timestamp, created_at
FROM transfers
"#;

fn store_err(err: sqlx::Error) -> IndexerError {
    IndexerError::DurableWrite(Arc::new(err))
}

/// Durable store over PostgreSQL.
///
/// Idempotency lives in the schema: the unique `(tx_hash, log_index)` index
/// plus `ON CONFLICT DO NOTHING` makes re-ingesting an already written range
/// a no-op.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects, retrying with backoff, and bootstraps the schema.
    ///
    /// # Errors
    ///
    /// [`IndexerError::DurableWrite`] when the database stays unreachable or
    /// the schema cannot be created.
    pub async fn connect(database_url: &str) -> IndexerResult<Self> {
        let connect = || async {
            PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(30))
                .connect(database_url)
                .await
        };

        let pool = connect
            .retry(ExponentialBuilder::default().with_max_times(3))
            .sleep(tokio::time::sleep)
            .notify(|err: &sqlx::Error, after: Duration| {
                debug!(error = %err, "database connect failed, retrying after {after:?}");
            })
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.bootstrap_schema().await?;
        info!("postgres store ready");
        Ok(store)
    }

    /// Wraps an existing pool; used by integration setups that manage their
    /// own connections.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn bootstrap_schema(&self) -> IndexerResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await.map_err(store_err)?;
        Ok(())
    }

    /// Transfers matching `query` plus the total matching count, newest
    /// block first, log order within a block.
    pub async fn query_transfers(
        &self,
        query: &TransferQuery,
    ) -> IndexerResult<(Vec<Transfer>, i64)> {
        let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM transfers");
        push_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?
            .try_get(0)
            .map_err(store_err)?;

        let mut builder = QueryBuilder::new(SELECT_COLUMNS);
        push_filters(&mut builder, query);
        builder.push(" ORDER BY block_number DESC, log_index ASC");
        builder.push(" LIMIT ").push_bind(query.limit.max(1));
        builder.push(" OFFSET ").push_bind(query.offset.max(0));

        let rows = builder.build().fetch_all(&self.pool).await.map_err(store_err)?;
        let transfers = rows.iter().map(row_to_transfer).collect::<IndexerResult<Vec<_>>>()?;
        Ok((transfers, total))
    }

    /// Aggregate statistics over the transfers matching `query`.
    pub async fn aggregate(&self, query: &TransferQuery) -> IndexerResult<TransferAggregate> {
        let mut builder = QueryBuilder::new("WITH filtered AS (SELECT * FROM transfers");
        push_filters(&mut builder, query);
        builder.push(
            r#")
SELECT
  (SELECT COUNT(*) FROM filtered) AS total_transfers,
  (SELECT COALESCE(SUM(value), 0)::float8 FROM filtered) AS total_value,
  (SELECT COUNT(DISTINCT token) FROM filtered) AS unique_tokens,
  (SELECT COUNT(*) FROM
     (SELECT "from" FROM filtered UNION SELECT "to" FROM filtered) addrs) AS unique_addresses,
  (SELECT MIN(timestamp) FROM filtered) AS min_time,
  (SELECT MAX(timestamp) FROM filtered) AS max_time
"#,
        );

        let row = builder.build().fetch_one(&self.pool).await.map_err(store_err)?;
        let total_value: f64 = row.try_get("total_value").map_err(store_err)?;

        Ok(TransferAggregate {
            total_transfers: row.try_get("total_transfers").map_err(store_err)?,
            total_value: format!("{total_value:.0}"),
            total_value_decimal: total_value / 1e18,
            unique_tokens: row.try_get("unique_tokens").map_err(store_err)?,
            unique_addresses: row.try_get("unique_addresses").map_err(store_err)?,
            time_range: TimeRange {
                start: row.try_get("min_time").map_err(store_err)?,
                end: row.try_get("max_time").map_err(store_err)?,
            },
        })
    }

    /// Closes the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn bulk_insert(&self, transfers: &[Transfer]) -> IndexerResult<u64> {
        if transfers.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut inserted = 0u64;
        for transfer in transfers {
            let result = sqlx::query(INSERT_TRANSFER)
                .bind(&transfer.event_signature)
                .bind(&transfer.token)
                .bind(&transfer.from)
                .bind(&transfer.to)
                .bind(transfer.value.to_string())
                .bind(transfer.value_decimal)
                .bind(transfer.block_number as i64)
                .bind(&transfer.tx_hash)
                .bind(transfer.tx_index as i64)
                .bind(transfer.log_index as i64)
                .bind(transfer.timestamp)
                .bind(transfer.created_at)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(store_err)?;

        if inserted < transfers.len() as u64 {
            debug!(
                batch = transfers.len(),
                inserted, "duplicate transfers absorbed by unique index"
            );
        }
        Ok(inserted)
    }
}

#[async_trait]
impl CursorBackend for PgStore {
    async fn last_processed_block(&self) -> IndexerResult<u64> {
        let row =
            sqlx::query("SELECT block_number FROM processed_blocks ORDER BY block_number DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;

        match row {
            Some(row) => {
                let block: i64 = row.try_get(0).map_err(store_err)?;
                Ok(block as u64)
            }
            None => Ok(0),
        }
    }

    async fn set_last_processed_block(&self, block_number: u64) -> IndexerResult<()> {
        sqlx::query(
            r#"
INSERT INTO processed_blocks (block_number, processed_at)
VALUES ($1, $2)
ON CONFLICT (block_number) DO UPDATE SET processed_at = EXCLUDED.processed_at
"#,
        )
        .bind(block_number as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &TransferQuery) {
    let mut separator = " WHERE ";

    if let Some(token) = &query.token {
        builder.push(separator).push("token = ").push_bind(token.clone());
        separator = " AND ";
    }
    if let Some(from) = &query.from {
        builder.push(separator).push("\"from\" = ").push_bind(from.clone());
        separator = " AND ";
    }
    if let Some(to) = &query.to {
        builder.push(separator).push("\"to\" = ").push_bind(to.clone());
        separator = " AND ";
    }
    if let Some(start_block) = query.start_block {
        builder.push(separator).push("block_number >= ").push_bind(start_block as i64);
        separator = " AND ";
    }
    if let Some(end_block) = query.end_block {
        builder.push(separator).push("block_number <= ").push_bind(end_block as i64);
        separator = " AND ";
    }
    if let Some(start_time) = query.start_time {
        builder.push(separator).push("timestamp >= ").push_bind(start_time);
        separator = " AND ";
    }
    if let Some(end_time) = query.end_time {
        builder.push(separator).push("timestamp <= ").push_bind(end_time);
    }
}

fn row_to_transfer(row: &PgRow) -> IndexerResult<Transfer> {
    let value_text: String = row.try_get("value").map_err(store_err)?;
    let value = U256::from_str_radix(&value_text, 10)
        .map_err(|err| store_err(sqlx::Error::Decode(Box::new(err))))?;
    let block_number: i64 = row.try_get("block_number").map_err(store_err)?;
    let tx_index: i64 = row.try_get("tx_index").map_err(store_err)?;
    let log_index: i64 = row.try_get("log_index").map_err(store_err)?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp").map_err(store_err)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(store_err)?;

    Ok(Transfer {
        event_signature: row.try_get("event_signature").map_err(store_err)?,
        token: row.try_get("token").map_err(store_err)?,
        from: row.try_get("from").map_err(store_err)?,
        to: row.try_get("to").map_err(store_err)?,
        value,
        value_decimal: row.try_get("value_decimal").map_err(store_err)?,
        block_number: block_number as u64,
        tx_hash: row.try_get("tx_hash").map_err(store_err)?,
        tx_index: tx_index as u64,
        log_index: log_index as u64,
        timestamp,
        created_at,
    })
}
