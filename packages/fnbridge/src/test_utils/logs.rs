use alloy_primitives::{address, Address, Bytes, LogData, B256};
use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolEvent;
use fnbridge_types::solidity;

pub const FUNCTIONS_CLIENT: Address = address!("0x00000000000000000000000000000000000000a1");
pub const FUNCTIONS_ORACLE: Address = address!("0x00000000000000000000000000000000000000b1");
pub const REQUESTING_CONTRACT: Address = address!("0x00000000000000000000000000000000000000c1");
pub const SUBSCRIPTION_ID: u64 = 42;

/// A mined log at `block`. Block and tx hashes are derived from the block
/// number so logs in different blocks never collide.
pub fn log_at(address: Address, data: LogData, block: u64, log_index: u64) -> Log {
    let block_bytes = block.to_be_bytes();
    let mut tx_bytes = [0xee; 9];
    tx_bytes[1..].copy_from_slice(&block_bytes);

    Log {
        inner: alloy_primitives::Log { address, data },
        block_hash: Some(B256::left_padding_from(&block_bytes)),
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(B256::left_padding_from(&tx_bytes)),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

pub fn request_sent_log(id: B256, block: u64, log_index: u64) -> Log {
    let data = solidity::RequestSent { id }.encode_log_data();
    log_at(FUNCTIONS_CLIENT, data, block, log_index)
}

pub fn request_fulfilled_log(id: B256, result: Bytes, block: u64, log_index: u64) -> Log {
    let data = solidity::RequestFulfilled { id, result }.encode_log_data();
    log_at(FUNCTIONS_CLIENT, data, block, log_index)
}

pub fn oracle_request_log(request_id: B256, payload: Bytes, block: u64, log_index: u64) -> Log {
    let data = solidity::OracleRequest {
        requestId: request_id,
        requestingContract: REQUESTING_CONTRACT,
        requestInitiator: Address::repeat_byte(0x01),
        subscriptionId: SUBSCRIPTION_ID,
        subscriptionOwner: Address::repeat_byte(0x02),
        data: payload,
    }
    .encode_log_data();
    log_at(FUNCTIONS_ORACLE, data, block, log_index)
}

/// A log from a watched contract with a signature nothing handles.
pub fn unknown_log(block: u64) -> Log {
    let data = LogData::new_unchecked(vec![B256::repeat_byte(0xee)], Bytes::new());
    log_at(FUNCTIONS_CLIENT, data, block, 0)
}
