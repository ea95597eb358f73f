use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Instant,
};

use alloy_primitives::Address;
use fnbridge_types::ContractKind;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{
    error::ChainError,
    retry::{retry, RetryError, RetryPolicy},
    transport::{NodeClient, NodeTransport},
};

/// Contract addresses as configured, parsed again on every dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredContracts {
    pub functions_client: String,
    pub functions_oracle: String,
}

impl MonitoredContracts {
    fn address_for(&self, kind: ContractKind) -> &str {
        match kind {
            ContractKind::FunctionsClient => &self.functions_client,
            ContractKind::FunctionsOracle => &self.functions_oracle,
        }
    }
}

/// A contract bound to one specific client instance.
#[derive(Clone)]
pub struct ContractBinding<C> {
    kind: ContractKind,
    address: Address,
    client: C,
    generation: u64,
}

impl<C: NodeClient> ContractBinding<C> {
    pub fn derive(
        kind: ContractKind,
        address: &str,
        client: &C,
        generation: u64,
    ) -> Result<Self, ChainError> {
        let invalid = |reason: String| ChainError::InvalidContractAddress {
            kind,
            address: address.to_string(),
            reason,
        };

        let parsed = Address::from_str(address.trim()).map_err(|e| invalid(e.to_string()))?;
        if parsed.is_zero() {
            return Err(invalid("zero address".to_string()));
        }

        Ok(Self {
            kind,
            address: parsed,
            client: client.clone(),
            generation,
        })
    }

    pub fn kind(&self) -> ContractKind {
        self.kind
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The live client and the bindings derived from it, always swapped as one unit.
pub struct ConnectionHandle<C> {
    generation: u64,
    client: C,
    functions_client: Option<ContractBinding<C>>,
    functions_oracle: Option<ContractBinding<C>>,
}

impl<C: NodeClient> ConnectionHandle<C> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn binding(&self, kind: ContractKind) -> Option<&ContractBinding<C>> {
        match kind {
            ContractKind::FunctionsClient => self.functions_client.as_ref(),
            ContractKind::FunctionsOracle => self.functions_oracle.as_ref(),
        }
    }

    pub fn bindings(&self) -> impl Iterator<Item = &ContractBinding<C>> {
        self.functions_client
            .iter()
            .chain(self.functions_oracle.iter())
    }

    /// Addresses of the bindings that derived successfully.
    pub fn monitored_addresses(&self) -> Vec<Address> {
        self.bindings().map(|b| b.address()).collect()
    }
}

/// Owns the single node connection. Readers take `Arc` snapshots of the
/// current handle, the renewal task replaces it on reconnect.
pub struct ConnectionManager<T: NodeTransport> {
    transport: T,
    endpoint: String,
    contracts: MonitoredContracts,
    policy: RetryPolicy,
    handle: RwLock<Option<Arc<ConnectionHandle<T::Client>>>>,
    generation: AtomicU64,
}

impl<T: NodeTransport> ConnectionManager<T> {
    pub fn new(
        transport: T,
        endpoint: impl Into<String>,
        contracts: MonitoredContracts,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            contracts,
            policy,
            handle: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn current(&self) -> Option<Arc<ConnectionHandle<T::Client>>> {
        self.handle.read().unwrap().clone()
    }

    /// Dials until success. Only returns an error once `cancel` fires.
    #[instrument(skip(self, cancel), fields(subsys = "Chain", endpoint = %self.endpoint))]
    pub async fn connect(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<ConnectionHandle<T::Client>>, ChainError> {
        let start = Instant::now();
        let result = retry(&self.policy, "dial node", cancel, |_| {
            self.transport.dial(&self.endpoint)
        })
        .await;

        match result {
            Ok(client) => {
                let handle = self.install(client);
                tracing::info!(
                    generation = handle.generation(),
                    "connected to node after {:?}",
                    start.elapsed()
                );
                Ok(handle)
            }
            Err(RetryError::Cancelled) => {
                tracing::info!("gave up dialing after {:?}: shutdown", start.elapsed());
                Err(ChainError::Cancelled)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!("could not dial node after {attempts} attempts: {last}");
                Err(last)
            }
        }
    }

    // bindings are derived before taking the lock, then client + bindings land in one write
    fn install(&self, client: T::Client) -> Arc<ConnectionHandle<T::Client>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let derive = |kind: ContractKind| {
            match ContractBinding::derive(kind, self.contracts.address_for(kind), &client, generation)
            {
                Ok(binding) => Some(binding),
                Err(err) => {
                    tracing::error!("failed to bind {kind}: {err}");
                    None
                }
            }
        };
        let functions_client = derive(ContractKind::FunctionsClient);
        let functions_oracle = derive(ContractKind::FunctionsOracle);

        let handle = Arc::new(ConnectionHandle {
            generation,
            client,
            functions_client,
            functions_oracle,
        });

        let previous = self.handle.write().unwrap().replace(handle.clone());
        if let Some(previous) = previous {
            tracing::debug!(
                "replaced connection generation {} with {}",
                previous.generation(),
                generation
            );
        }

        handle
    }

    /// Releases the handle. Calling it again is a no-op.
    #[instrument(skip(self), fields(subsys = "Chain"))]
    pub fn teardown(&self) {
        let taken = self.handle.write().unwrap().take();
        match taken {
            Some(handle) => tracing::info!(
                generation = handle.generation(),
                "closing node connection"
            ),
            None => tracing::debug!("no node connection to close"),
        }
    }

    /// Serves renewal requests: each one triggers a fresh dial, and every
    /// successful dial is announced on `ready_tx`.
    ///
    /// The renewal channel closing while not shutting down means the state
    /// machine is gone and the bridge can never recover, so the process aborts.
    pub fn spawn_renewal_loop(
        self: Arc<Self>,
        mut renew_rx: mpsc::Receiver<()>,
        ready_tx: mpsc::Sender<()>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!("connection renewal loop shutting down");
                        break;
                    }
                    msg = renew_rx.recv() => match msg {
                        Some(()) => match self.connect(&cancel).await {
                            Ok(_) => {
                                if ready_tx.send(()).await.is_err() {
                                    if cancel.is_cancelled() {
                                        break;
                                    }
                                    tracing::warn!("connection-ready receiver is gone");
                                }
                            }
                            Err(ChainError::Cancelled) => break,
                            Err(err) => tracing::error!("connection renewal failed: {err}"),
                        },
                        None => {
                            if cancel.is_cancelled() {
                                break;
                            }
                            tracing::error!("renewal channel closed, node connection can no longer be re-established");
                            std::process::abort();
                        }
                    },
                }
            }
        })
    }
}
