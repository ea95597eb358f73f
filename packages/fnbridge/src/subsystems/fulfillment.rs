pub mod error;
pub mod upstream;

use std::sync::Arc;

use fnbridge_types::FunctionRequest;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::publish::Publish;

use upstream::Upstream;

/// Pulls function requests off the inbound queue, one at a time, and replies
/// with their fulfillment.
pub struct FulfillmentBridge<P: Publish> {
    publisher: Arc<P>,
    upstream: Upstream,
}

impl<P: Publish> FulfillmentBridge<P> {
    pub fn new(publisher: Arc<P>, upstream: Upstream) -> Self {
        Self {
            publisher,
            upstream,
        }
    }

    /// Returns once the inbound queue closes or `cancel` fires.
    #[instrument(skip_all, fields(subsys = "Fulfillment"))]
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("fulfillment bridge forwarding to {}", self.upstream.base_url());

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("fulfillment bridge cancelled");
                    break;
                }
                message = self.publisher.receive() => match message {
                    Some(message) => message,
                    None => {
                        tracing::info!("inbound queue closed");
                        break;
                    }
                }
            };

            self.handle_message(&message).await;
        }
    }

    /// Handles one raw inbound message. Anything that is not a function
    /// request is logged and dropped.
    pub async fn handle_message(&self, message: &[u8]) {
        let request: FunctionRequest = match serde_json::from_slice(message) {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(
                    "dropping malformed function request ({} bytes): {err}",
                    message.len()
                );
                return;
            }
        };

        let fulfilled = self.upstream.execute(&request).await;

        if let Err(err) = self.publisher.reply(fulfilled).await {
            tracing::error!("{err}");
        }
    }
}
