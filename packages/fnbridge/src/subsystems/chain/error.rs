use alloy_primitives::B256;
use fnbridge_types::ContractKind;
use thiserror::Error;
use utils::error::EvmClientError;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("node endpoint: {0}")]
    Endpoint(#[from] EvmClientError),
    #[error("dial {endpoint}: {reason}")]
    Dial { endpoint: String, reason: String },
    #[error("subscribe logs: {0}")]
    Subscribe(String),
    #[error("query chain: {0}")]
    Query(String),
    #[error("invalid {kind} address {address:?}: {reason}")]
    InvalidContractAddress {
        kind: ContractKind,
        address: String,
        reason: String,
    },
    #[error("connection generation {0} has no contract bindings to watch")]
    NoBindings(u64),
    #[error("no live node connection")]
    NotConnected,
    #[error("shutdown requested")]
    Cancelled,
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("log has no event signature topic")]
    MissingSignature,
    #[error("not support event, topic: {0}")]
    Unsupported(B256),
    #[error("failed to decode {event} log: {reason}")]
    Decode { event: &'static str, reason: String },
}
