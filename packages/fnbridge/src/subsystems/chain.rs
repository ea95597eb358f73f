pub mod backfill;
pub mod connection;
pub mod error;
pub mod events;
pub mod retry;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod chain_tests;

use std::{sync::Arc, time::Duration};

use fnbridge_types::ChainEvent;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::Config;

use backfill::BackfillSettings;
use connection::{ConnectionManager, MonitoredContracts};
use retry::RetryPolicy;
use subscription::{LogSubscriber, StateWatch, SubscriberChannels};
use transport::NodeTransport;

/// Decoded events waiting for the router. Events past this are dropped with a warning.
pub const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSettings {
    pub endpoint: String,
    pub contracts: MonitoredContracts,
    pub reconnect: RetryPolicy,
    pub subscribe: RetryPolicy,
    pub backfill: Option<BackfillSettings>,
}

impl From<&Config> for ChainSettings {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.node_endpoint.clone(),
            contracts: MonitoredContracts {
                functions_client: config.functions_client_address.clone(),
                functions_oracle: config.functions_oracle_address.clone(),
            },
            reconnect: RetryPolicy::unbounded(
                Duration::from_millis(config.reconnect_initial_delay_ms),
                Duration::from_millis(config.reconnect_max_delay_ms),
            ),
            subscribe: RetryPolicy::bounded(
                config.subscribe_attempts.max(1),
                Duration::from_millis(config.subscribe_initial_delay_ms),
                Duration::from_millis(config.subscribe_max_delay_ms),
            ),
            backfill: config.backfill_on_reconnect.then_some(BackfillSettings {
                chunk_size: config.backfill_chunk_size,
            }),
        }
    }
}

/// The connection renewal task and the log subscriber task, wired together.
pub struct ChainSubsystem<T: NodeTransport> {
    pub connections: Arc<ConnectionManager<T>>,
    pub state: StateWatch,
    cancel: CancellationToken,
    renewal: JoinHandle<()>,
    subscriber: JoinHandle<()>,
}

impl<T: NodeTransport> ChainSubsystem<T> {
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    #[instrument(skip_all, fields(subsys = "Chain"))]
    pub fn spawn(
        transport: T,
        settings: ChainSettings,
        events_tx: mpsc::Sender<ChainEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let ChainSettings {
            endpoint,
            contracts,
            reconnect,
            subscribe,
            backfill,
        } = settings;

        if backfill.is_none() {
            tracing::warn!("reconnect backfill disabled, logs emitted during a node outage will be missed");
        }

        let (renew_tx, renew_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = mpsc::channel(1);

        let connections = Arc::new(ConnectionManager::new(
            transport, endpoint, contracts, reconnect,
        ));

        let renewal = connections
            .clone()
            .spawn_renewal_loop(renew_rx, ready_tx, cancel.clone());

        let (subscriber, state) = LogSubscriber::new(
            connections.clone(),
            SubscriberChannels {
                renew_tx,
                ready_rx,
                events_tx,
            },
            subscribe,
            backfill,
        );
        let subscriber = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if let Err(err) = subscriber.run(cancel).await {
                    tracing::error!("log subscriber cannot continue: {err}");
                    std::process::abort();
                }
            }
        });

        Self {
            connections,
            state,
            cancel,
            renewal,
            subscriber,
        }
    }

    /// Stops both tasks, then closes the node connection.
    #[instrument(skip_all, fields(subsys = "Chain"))]
    pub async fn shutdown(self) {
        let Self {
            connections,
            cancel,
            renewal,
            subscriber,
            ..
        } = self;

        cancel.cancel();

        for (name, task) in [("subscriber", subscriber), ("renewal", renewal)] {
            match tokio::time::timeout(Self::SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!("{name} task failed: {err}"),
                Err(_) => tracing::warn!("{name} task did not stop within {:?}", Self::SHUTDOWN_GRACE),
            }
        }

        connections.teardown();
    }
}
