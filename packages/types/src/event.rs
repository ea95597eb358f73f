use alloy_primitives::{Address, Bytes, TxHash, B256};
use alloy_rpc_types_eth::Log;
use serde::{Deserialize, Serialize};

use crate::{PayloadError, RequestParams};

/// Where a log came from. Carried with every classified event so downstream
/// consumers can correlate and dedupe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct LogMeta {
    pub address: Address,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub tx_hash: Option<TxHash>,
    pub log_index: Option<u64>,
}

impl LogMeta {
    pub fn from_log(log: &Log) -> Self {
        Self {
            address: log.address(),
            block_number: log.block_number,
            block_hash: log.block_hash,
            tx_hash: log.transaction_hash,
            log_index: log.log_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    RequestSent(RequestSentEvent),
    RequestFulfilled(RequestFulfilledEvent),
    OracleRequest(OracleRequestEvent),
}

impl ChainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::RequestSent(_) => "RequestSent",
            ChainEvent::RequestFulfilled(_) => "RequestFulfilled",
            ChainEvent::OracleRequest(_) => "OracleRequest",
        }
    }

    pub fn request_id(&self) -> B256 {
        match self {
            ChainEvent::RequestSent(e) => e.id,
            ChainEvent::RequestFulfilled(e) => e.id,
            ChainEvent::OracleRequest(e) => e.request_id,
        }
    }

    pub fn meta(&self) -> &LogMeta {
        match self {
            ChainEvent::RequestSent(e) => &e.meta,
            ChainEvent::RequestFulfilled(e) => &e.meta,
            ChainEvent::OracleRequest(e) => &e.meta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSentEvent {
    pub id: B256,
    pub meta: LogMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFulfilledEvent {
    pub id: B256,
    pub result: Bytes,
    pub meta: LogMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequestEvent {
    pub request_id: B256,
    pub requesting_contract: Address,
    pub request_initiator: Address,
    pub subscription_id: u64,
    pub subscription_owner: Address,
    /// The raw payload, kept even when `params` failed to decode.
    pub data: Bytes,
    pub params: Result<RequestParams, PayloadError>,
    pub meta: LogMeta,
}
