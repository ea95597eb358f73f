use fnbridge_types::{ChainEvent, FunctionRequest, OracleRequestEvent, PayloadError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Param holding the function path.
pub const URL_PARAM: &str = "url";
/// Param forwarded as the function's JSON body.
pub const BODY_PARAM: &str = "body";

#[derive(Error, Debug, PartialEq)]
pub enum RouteError {
    #[error("request params failed to decode: {0}")]
    Params(PayloadError),
    #[error("request params have no text \"{URL_PARAM}\" entry")]
    MissingUrl,
    #[error("serialize function request: {0}")]
    Serialize(String),
}

/// Turns oracle requests seen on chain into messages on the inbound queue.
pub struct RequestRouter {
    events_rx: mpsc::Receiver<ChainEvent>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
}

impl RequestRouter {
    pub fn new(
        events_rx: mpsc::Receiver<ChainEvent>,
        inbound_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            events_rx,
            inbound_tx,
        }
    }

    #[instrument(skip_all, fields(subsys = "Router"))]
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::info!("chain event stream closed");
                        break;
                    }
                }
            };

            let request = match event {
                ChainEvent::OracleRequest(request) => request,
                ChainEvent::RequestSent(sent) => {
                    tracing::info!(id = %sent.id, "request sent");
                    continue;
                }
                ChainEvent::RequestFulfilled(fulfilled) => {
                    tracing::info!(
                        id = %fulfilled.id,
                        result_len = fulfilled.result.len(),
                        "request fulfilled on chain"
                    );
                    continue;
                }
            };

            let message = match function_request_from_oracle(&request).and_then(|req| {
                serde_json::to_vec(&req).map_err(|e| RouteError::Serialize(e.to_string()))
            }) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(request_id = %request.request_id, "skipping oracle request: {err}");
                    continue;
                }
            };

            // the bounded queue is where back-pressure from the bridge lands
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.inbound_tx.send(message) => res,
            };

            if sent.is_err() {
                tracing::error!("inbound queue closed, router stopping");
                break;
            }
        }
    }
}

pub fn function_request_from_oracle(
    event: &OracleRequestEvent,
) -> Result<FunctionRequest, RouteError> {
    let params = event.params.as_ref().map_err(|e| RouteError::Params(e.clone()))?;

    let request_url = params
        .get(URL_PARAM)
        .and_then(|v| v.as_text())
        .ok_or(RouteError::MissingUrl)?;

    let body = params
        .get(BODY_PARAM)
        .map(|v| v.to_json())
        .unwrap_or(serde_json::Value::Null);

    Ok(FunctionRequest {
        request_id: const_hex::encode_prefixed(event.request_id),
        request_url: request_url.to_string(),
        body,
    })
}
