//! Pure conversion from raw logs to canonical [`Transfer`] records.

use alloy::{
    primitives::{Address, B256, U256, b256},
    rpc::types::Log,
};
use chrono::{DateTime, Utc};

use crate::{error::MalformedLog, models::Transfer};

/// keccak256 of `Transfer(address,address,uint256)`.
pub const TRANSFER_EVENT_TOPIC: B256 =
    b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// String identifier stored with every ERC-20 Transfer record.
pub const EVENT_SIGNATURE_TRANSFER: &str = "Transfer";

/// Parses a raw log and its block timestamp into a [`Transfer`].
///
/// The contract: exactly three topics, topic0 equal to
/// [`TRANSFER_EVENT_TOPIC`], and a 32-byte data payload holding the
/// big-endian unsigned value. `from`/`to` are the low 20 bytes of topics 1
/// and 2. Address fields come out lower-cased.
///
/// # Errors
///
/// Returns [`MalformedLog`] when the log violates the contract. Callers are
/// expected to skip and count such logs rather than abort the batch.
pub fn parse_transfer_log(log: &Log, block_time: DateTime<Utc>) -> Result<Transfer, MalformedLog> {
    let topics = log.inner.data.topics();
    if topics.len() != 3 {
        return Err(MalformedLog::TopicCount(topics.len()));
    }
    if topics[0] != TRANSFER_EVENT_TOPIC {
        return Err(MalformedLog::NotTransfer);
    }

    let payload = &log.inner.data.data;
    if payload.len() != 32 {
        return Err(MalformedLog::DataLength(payload.len()));
    }

    let block_number = log.block_number.ok_or(MalformedLog::MissingField("block number"))?;
    let tx_hash = log.transaction_hash.ok_or(MalformedLog::MissingField("transaction hash"))?;
    let tx_index = log.transaction_index.ok_or(MalformedLog::MissingField("transaction index"))?;
    let log_index = log.log_index.ok_or(MalformedLog::MissingField("log index"))?;

    let from = Address::from_word(topics[1]);
    let to = Address::from_word(topics[2]);
    let value = U256::from_be_slice(payload);

    Ok(Transfer {
        event_signature: EVENT_SIGNATURE_TRANSFER.to_owned(),
        token: format!("{:#x}", log.inner.address),
        from: format!("{from:#x}"),
        to: format!("{to:#x}"),
        value,
        value_decimal: wei_to_decimal(value),
        block_number,
        tx_hash: format!("{tx_hash:#x}"),
        tx_index,
        log_index,
        timestamp: block_time,
        created_at: Utc::now(),
    })
}

/// `value / 10^18` rounded to the nearest IEEE-754 double.
///
/// 2^256 is ~1.2e77, comfortably inside f64 range; the decimal string of a
/// U256 always parses.
pub(crate) fn wei_to_decimal(value: U256) -> f64 {
    let approx: f64 = value.to_string().parse().unwrap_or(f64::INFINITY);
    approx / 1e18
}
