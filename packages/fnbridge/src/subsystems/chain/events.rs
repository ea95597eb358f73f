use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolEvent;
use fnbridge_types::{
    decode_request_params, solidity, ChainEvent, LogMeta, OracleRequestEvent,
    RequestFulfilledEvent, RequestSentEvent,
};

use super::error::ClassifyError;

/// Maps a raw log to a typed event by its signature topic.
pub fn classify(log: &Log) -> Result<ChainEvent, ClassifyError> {
    let topic0 = *log.topics().first().ok_or(ClassifyError::MissingSignature)?;
    let meta = LogMeta::from_log(log);
    let data = &log.inner.data;

    match topic0 {
        t if t == solidity::RequestSent::SIGNATURE_HASH => {
            let event = solidity::RequestSent::decode_log_data(data)
                .map_err(|e| decode_error("RequestSent", e))?;
            Ok(ChainEvent::RequestSent(RequestSentEvent { id: event.id, meta }))
        }
        t if t == solidity::RequestFulfilled::SIGNATURE_HASH => {
            let event = solidity::RequestFulfilled::decode_log_data(data)
                .map_err(|e| decode_error("RequestFulfilled", e))?;
            Ok(ChainEvent::RequestFulfilled(RequestFulfilledEvent {
                id: event.id,
                result: event.result,
                meta,
            }))
        }
        t if t == solidity::OracleRequest::SIGNATURE_HASH => {
            let event = solidity::OracleRequest::decode_log_data(data)
                .map_err(|e| decode_error("OracleRequest", e))?;
            let params = decode_request_params(&event.data);
            Ok(ChainEvent::OracleRequest(OracleRequestEvent {
                request_id: event.requestId,
                requesting_contract: event.requestingContract,
                request_initiator: event.requestInitiator,
                subscription_id: event.subscriptionId,
                subscription_owner: event.subscriptionOwner,
                data: event.data,
                params,
                meta,
            }))
        }
        other => Err(ClassifyError::Unsupported(other)),
    }
}

fn decode_error(event: &'static str, err: alloy_sol_types::Error) -> ClassifyError {
    ClassifyError::Decode {
        event,
        reason: err.to_string(),
    }
}
