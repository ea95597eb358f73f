use alloy_provider::{DynProvider, Provider};
use alloy_rpc_types_eth::{Filter, Log};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use utils::evm_client::EvmEndpoint;

use super::error::ChainError;

/// Dials a node. One successful dial is one connection generation.
#[async_trait]
pub trait NodeTransport: Send + Sync + 'static {
    type Client: NodeClient;

    async fn dial(&self, endpoint: &str) -> Result<Self::Client, ChainError>;
}

/// The node calls the bridge relies on.
#[async_trait]
pub trait NodeClient: Clone + Send + Sync + 'static {
    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogSubscription, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError>;
}

/// Why a live subscription stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFault {
    Closed,
    Stream(String),
}

impl std::fmt::Display for SubscriptionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionFault::Closed => write!(f, "subscription closed by node"),
            SubscriptionFault::Stream(reason) => write!(f, "subscription stream error: {reason}"),
        }
    }
}

/// A live log subscription. The error receiver fires at most once, after
/// which the subscription is dead and must be torn down.
pub struct LogSubscription {
    pub logs: mpsc::UnboundedReceiver<Log>,
    pub errors: oneshot::Receiver<SubscriptionFault>,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl LogSubscription {
    pub fn new(
        logs: mpsc::UnboundedReceiver<Log>,
        errors: oneshot::Receiver<SubscriptionFault>,
        teardown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            logs,
            errors,
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

/// Websocket transport backed by an alloy pubsub provider.
#[derive(Debug, Clone, Default)]
pub struct EvmTransport;

#[async_trait]
impl NodeTransport for EvmTransport {
    type Client = EvmNodeClient;

    async fn dial(&self, endpoint: &str) -> Result<EvmNodeClient, ChainError> {
        let endpoint = EvmEndpoint::new_ws(endpoint)?;
        let provider = endpoint
            .to_provider()
            .await
            .map_err(|e| ChainError::Dial {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        Ok(EvmNodeClient { provider })
    }
}

#[derive(Clone)]
pub struct EvmNodeClient {
    provider: DynProvider,
}

#[async_trait]
impl NodeClient for EvmNodeClient {
    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogSubscription, ChainError> {
        let mut sub = self
            .provider
            .subscribe_logs(filter)
            .await
            .map_err(|e| ChainError::Subscribe(e.to_string()))?;

        let sub_id = *sub.local_id();
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = oneshot::channel();

        // forwards until the node drops us or the receiver goes away
        let forwarder = tokio::spawn(async move {
            loop {
                match sub.recv().await {
                    Ok(log) => {
                        if log_tx.send(log).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = fault_tx.send(SubscriptionFault::Stream(err.to_string()));
                        return;
                    }
                }
            }
        });

        let provider = self.provider.clone();
        Ok(LogSubscription::new(log_rx, fault_rx, move || {
            // release the node-side filter
            if let Err(err) = provider.root().unsubscribe(sub_id) {
                tracing::debug!("unsubscribe {sub_id}: {err}");
            }
            forwarder.abort();
        }))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Query(e.to_string()))
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        self.provider
            .get_logs(filter)
            .await
            .map_err(|e| ChainError::Query(e.to_string()))
    }
}
