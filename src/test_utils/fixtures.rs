//! Builders for raw logs, RPC blocks, and mock-backed endpoints.

use alloy::{
    consensus::Header as ConsensusHeader,
    primitives::{Address, B256, LogData, U256},
    providers::{RootProvider, mock::Asserter},
    rpc::{
        client::RpcClient,
        types::{Block, BlockTransactions, Header, Log},
    },
};

use crate::{
    models::{Transfer, block_time},
    parser::TRANSFER_EVENT_TOPIC,
    rpc_pool::{CircuitBreakerConfig, Endpoint, EndpointConfig},
};

/// A well-formed ERC-20 Transfer log.
#[must_use]
pub fn transfer_log(
    token: Address,
    from: Address,
    to: Address,
    value: U256,
    block_number: u64,
    log_index: u64,
) -> Log {
    let topics = vec![TRANSFER_EVENT_TOPIC, from.into_word(), to.into_word()];
    let payload = value.to_be_bytes::<32>();

    Log {
        inner: alloy::primitives::Log {
            address: token,
            data: LogData::new_unchecked(topics, payload.to_vec().into()),
        },
        block_hash: Some(B256::repeat_byte(0xbb)),
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(B256::repeat_byte(block_number as u8)),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

/// Minimal RPC block carrying the fields the scanner reads.
#[must_use]
pub fn rpc_block(number: u64, timestamp: u64) -> Block {
    let mut inner = ConsensusHeader::default();
    inner.number = number;
    inner.timestamp = timestamp;

    Block {
        header: Header {
            hash: B256::repeat_byte(number as u8),
            inner,
            total_difficulty: None,
            size: None,
        },
        uncles: Vec::new(),
        transactions: BlockTransactions::Hashes(Vec::new()),
        withdrawals: None,
    }
}

/// An [`Endpoint`] whose provider answers from the given [`Asserter`].
#[must_use]
pub fn mocked_endpoint(
    name: &str,
    weight: u32,
    max_range: u64,
    breaker: CircuitBreakerConfig,
    asserter: &Asserter,
) -> Endpoint {
    let config = EndpointConfig {
        name: name.to_owned(),
        url: format!("mock://{name}"),
        weight,
        max_range,
        timeout: std::time::Duration::from_secs(5),
    };
    let provider = RootProvider::new(RpcClient::mocked(asserter.clone()));
    Endpoint::new(config, breaker, provider)
}

/// A canonical transfer record for bus and store tests.
#[must_use]
pub fn sample_transfer(block_number: u64, log_index: u64) -> Transfer {
    let value = U256::from(1_000_000_000_000_000_000u64);
    Transfer {
        event_signature: "Transfer".to_owned(),
        token: "0x00000000000000000000000000000000000000aa".to_owned(),
        from: "0x1111111111111111111111111111111111111111".to_owned(),
        to: "0x2222222222222222222222222222222222222222".to_owned(),
        value,
        value_decimal: 1.0,
        block_number,
        tx_hash: format!("0x{:064x}", block_number),
        tx_index: 0,
        log_index,
        timestamp: block_time(1_700_000_000),
        created_at: block_time(1_700_000_100),
    }
}
