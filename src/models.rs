//! Canonical records produced and persisted by the ingestion pipeline.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized ERC-20 Transfer event.
///
/// `value` is kept as a 256-bit integer and serialized as a base-10 decimal
/// string, both in JSON and in the durable store, so no precision is lost.
/// `value_decimal` is the lossy `value / 10^18` double used for aggregation
/// sorts and display. `event_signature` is always `"Transfer"` today and
/// future-proofs storage to other event kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub event_signature: String,
    pub token: String,
    pub from: String,
    pub to: String,
    #[serde(with = "u256_decimal")]
    pub value: U256,
    pub value_decimal: f64,
    pub block_number: u64,
    pub tx_hash: String,
    pub tx_index: u64,
    pub log_index: u64,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Watermark of fully ingested blocks. Ingestion resumes from
/// `block_number + 1` after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedBlock {
    pub block_number: u64,
    pub processed_at: DateTime<Utc>,
}

/// Filter parameters for the transfer query surface consumed by the HTTP
/// facade.
#[derive(Debug, Clone, Default)]
pub struct TransferQuery {
    pub token: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Aggregated statistics over a filtered set of transfers.
#[derive(Debug, Clone, Serialize)]
pub struct TransferAggregate {
    pub total_transfers: i64,
    pub total_value: String,
    pub total_value_decimal: f64,
    pub unique_tokens: i64,
    pub unique_addresses: i64,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Converts a unix block timestamp to a UTC instant. Block timestamps are
/// seconds since the epoch and always inside chrono's representable range.
#[must_use]
pub fn block_time(unix_seconds: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(unix_seconds as i64, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Serializes a [`U256`] as a base-10 decimal string.
mod u256_decimal {
    use alloy::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_str_radix(&raw, 10).map_err(Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_serializes_as_decimal_string() {
        let transfer = Transfer {
            event_signature: "Transfer".to_owned(),
            token: "0x00000000000000000000000000000000000000aa".to_owned(),
            from: "0x00000000000000000000000000000000000000bb".to_owned(),
            to: "0x00000000000000000000000000000000000000cc".to_owned(),
            value: U256::from(1_000_000_000_000_000_000u64),
            value_decimal: 1.0,
            block_number: 7,
            tx_hash: format!("0x{}", "11".repeat(32)),
            tx_index: 0,
            log_index: 3,
            timestamp: block_time(1_700_000_000),
            created_at: block_time(1_700_000_100),
        };

        let json = serde_json::to_value(&transfer).unwrap();
        assert_eq!(json["value"], "1000000000000000000");
        assert_eq!(json["event_signature"], "Transfer");
        assert_eq!(json["block_number"], 7);

        let back: Transfer = serde_json::from_value(json).unwrap();
        assert_eq!(back, transfer);
    }

    #[test]
    fn block_time_is_utc_seconds() {
        let instant = block_time(0);
        assert_eq!(instant, DateTime::UNIX_EPOCH);
        assert_eq!(block_time(1_700_000_000).timestamp(), 1_700_000_000);
    }
}
