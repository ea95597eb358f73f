use std::sync::Arc;

use alloy_rpc_types_eth::{Filter, Log};
use fnbridge_types::{supported_event_signatures, ChainEvent};
use tokio::sync::{
    broadcast,
    mpsc::{self, error::TrySendError},
    watch,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{
    backfill::{fetch_missed_logs, BackfillSettings, LogDedupe},
    connection::{ConnectionHandle, ConnectionManager},
    error::ChainError,
    events::classify,
    retry::{retry, RetryError, RetryPolicy},
    transport::{LogSubscription, NodeClient, NodeTransport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Unconnected,
    AwaitingConnection,
    Subscribing,
    Subscribed,
    Faulted,
}

/// Lets other tasks follow the subscriber. `current` always holds the latest
/// state, `transitions()` receivers see every change in order.
#[derive(Clone)]
pub struct StateWatch {
    pub current: watch::Receiver<SubscriberState>,
    transitions: broadcast::Sender<SubscriberState>,
}

impl StateWatch {
    pub fn get(&self) -> SubscriberState {
        *self.current.borrow()
    }

    pub fn transitions(&self) -> broadcast::Receiver<SubscriberState> {
        self.transitions.subscribe()
    }

    pub async fn wait_for(&mut self, state: SubscriberState) -> bool {
        self.current.wait_for(|s| *s == state).await.is_ok()
    }
}

pub struct SubscriberChannels {
    /// Asks the connection manager for a fresh connection.
    pub renew_tx: mpsc::Sender<()>,
    /// Fires once per successful (re)connection.
    pub ready_rx: mpsc::Receiver<()>,
    pub events_tx: mpsc::Sender<ChainEvent>,
}

enum Delivery {
    Log(Box<Log>),
    Fault(String),
    Cancelled,
}

/// The perpetual connect / subscribe / consume loop.
pub struct LogSubscriber<T: NodeTransport> {
    connections: Arc<ConnectionManager<T>>,
    renew_tx: mpsc::Sender<()>,
    ready_rx: mpsc::Receiver<()>,
    events_tx: mpsc::Sender<ChainEvent>,
    policy: RetryPolicy,
    backfill: Option<BackfillSettings>,
    state: watch::Sender<SubscriberState>,
    transitions: broadcast::Sender<SubscriberState>,
    subscription: Option<LogSubscription>,
    subscribed_before: bool,
    last_seen_block: Option<u64>,
    // node head when the current subscription went live
    subscribed_at_block: Option<u64>,
    dedupe: LogDedupe,
}

impl<T: NodeTransport> LogSubscriber<T> {
    pub fn new(
        connections: Arc<ConnectionManager<T>>,
        channels: SubscriberChannels,
        policy: RetryPolicy,
        backfill: Option<BackfillSettings>,
    ) -> (Self, StateWatch) {
        let SubscriberChannels {
            renew_tx,
            ready_rx,
            events_tx,
        } = channels;

        let (state, current) = watch::channel(SubscriberState::Unconnected);
        let (transitions, _) = broadcast::channel(64);

        let watch = StateWatch {
            current,
            transitions: transitions.clone(),
        };

        let subscriber = Self {
            connections,
            renew_tx,
            ready_rx,
            events_tx,
            policy,
            backfill,
            state,
            transitions,
            subscription: None,
            subscribed_before: false,
            last_seen_block: None,
            subscribed_at_block: None,
            dedupe: LogDedupe::default(),
        };

        (subscriber, watch)
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Runs until `cancel` fires. Returns an error only when the connection
    /// manager is gone outside shutdown, which nothing can recover from.
    #[instrument(skip_all, fields(subsys = "Chain"))]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ChainError> {
        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            let next = match self.state() {
                SubscriberState::Unconnected | SubscriberState::Faulted => {
                    self.request_connection(&cancel).await
                }
                SubscriberState::AwaitingConnection => self.await_connection(&cancel).await,
                SubscriberState::Subscribing => self.subscribe(&cancel).await,
                SubscriberState::Subscribed => Ok(self.consume(&cancel).await),
            };

            match next {
                Ok(Some(state)) => self.transition(state),
                Ok(None) => break Ok(()),
                Err(_) if cancel.is_cancelled() => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        self.drop_subscription();
        tracing::info!("log subscriber stopped");
        result
    }

    fn transition(&mut self, next: SubscriberState) {
        let prev = self.state();
        if prev == next {
            return;
        }
        tracing::debug!("subscriber {prev:?} -> {next:?}");
        self.state.send_replace(next);
        let _ = self.transitions.send(next);
    }

    async fn request_connection(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<SubscriberState>, ChainError> {
        Ok(self
            .send_renewal(cancel)
            .await?
            .then_some(SubscriberState::AwaitingConnection))
    }

    // Ok(false) on shutdown
    async fn send_renewal(&mut self, cancel: &CancellationToken) -> Result<bool, ChainError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(false),
            res = self.renew_tx.send(()) => match res {
                Ok(()) => Ok(true),
                Err(_) => Err(ChainError::ChannelClosed("connection renewal")),
            }
        }
    }

    async fn wait_ready(&mut self, cancel: &CancellationToken) -> Result<bool, ChainError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(false),
            msg = self.ready_rx.recv() => match msg {
                Some(()) => Ok(true),
                None => Err(ChainError::ChannelClosed("connection ready")),
            }
        }
    }

    async fn await_connection(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<SubscriberState>, ChainError> {
        Ok(self
            .wait_ready(cancel)
            .await?
            .then_some(SubscriberState::Subscribing))
    }

    async fn subscribe(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<SubscriberState>, ChainError> {
        let attempt = match self.connections.current() {
            Some(handle) => self.subscribe_on(handle, cancel).await,
            None => Err(ChainError::NotConnected),
        };

        match attempt {
            Ok(()) => Ok(Some(SubscriberState::Subscribed)),
            Err(ChainError::Cancelled) => Ok(None),
            Err(err) => {
                // stay in Subscribing, try again on the next connection
                tracing::warn!("could not subscribe, requesting a new connection: {err}");
                let renewed = self.send_renewal(cancel).await? && self.wait_ready(cancel).await?;
                Ok(renewed.then_some(SubscriberState::Subscribing))
            }
        }
    }

    async fn subscribe_on(
        &mut self,
        handle: Arc<ConnectionHandle<T::Client>>,
        cancel: &CancellationToken,
    ) -> Result<(), ChainError> {
        tracing::info!(
            generation = handle.generation(),
            addresses = ?handle.monitored_addresses(),
            "subscribing to contract logs"
        );

        let result = retry(&self.policy, "subscribe logs", cancel, |_| {
            let handle = handle.clone();
            async move {
                let filter = log_filter(&handle)?;
                let sub = handle.client().subscribe_logs(&filter).await?;
                Ok::<_, ChainError>((sub, filter))
            }
        })
        .await;

        let (subscription, filter) = match result {
            Ok(ok) => ok,
            Err(RetryError::Cancelled) => return Err(ChainError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!("subscribe failed {attempts} times: {last}");
                return Err(last);
            }
        };

        self.drop_subscription();
        self.subscription = Some(subscription);

        // later of the last log seen and the head when the previous subscription went live
        let cursor = self.last_seen_block.max(self.subscribed_at_block);

        match handle.client().block_number().await {
            Ok(head) => self.subscribed_at_block = Some(head),
            Err(err) => tracing::warn!("could not read head block after subscribing: {err}"),
        }

        let resubscribed = self.subscribed_before;
        self.subscribed_before = true;
        if resubscribed {
            self.catch_up(handle.client(), &filter, cursor, cancel).await?;
        }

        Ok(())
    }

    // live logs queue up in the new subscription while this runs
    async fn catch_up(
        &mut self,
        client: &T::Client,
        filter: &Filter,
        cursor: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<(), ChainError> {
        let Some(last_seen) = cursor else {
            tracing::warn!(
                "resubscribed with no known block position, logs emitted while disconnected are not recovered"
            );
            return Ok(());
        };

        let Some(settings) = self.backfill else {
            tracing::warn!(
                "resubscribed without backfill, logs emitted after block {} while disconnected are not recovered",
                last_seen
            );
            return Ok(());
        };

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChainError::Cancelled),
            res = fetch_missed_logs(client, filter, last_seen.saturating_add(1), settings) => res,
        };

        match fetched {
            Ok(logs) => {
                tracing::info!("backfilled {} logs after block {}", logs.len(), last_seen);
                for log in logs {
                    self.dispatch(log);
                }
            }
            Err(err) => {
                tracing::warn!(
                    "backfill failed, logs emitted after block {} may be missing: {}",
                    last_seen,
                    err
                );
            }
        }

        Ok(())
    }

    async fn consume(&mut self, cancel: &CancellationToken) -> Option<SubscriberState> {
        let delivery = match self.subscription.as_mut() {
            Some(sub) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Delivery::Cancelled,
                    log = sub.logs.recv() => match log {
                        Some(log) => Delivery::Log(Box::new(log)),
                        None => Delivery::Fault("log stream closed".to_string()),
                    },
                    fault = &mut sub.errors => match fault {
                        Ok(fault) => Delivery::Fault(fault.to_string()),
                        Err(_) => Delivery::Fault("error channel closed".to_string()),
                    },
                }
            }
            None => Delivery::Fault("no active subscription".to_string()),
        };

        match delivery {
            Delivery::Log(log) => {
                self.dispatch(*log);
                Some(SubscriberState::Subscribed)
            }
            Delivery::Fault(reason) => {
                tracing::error!("log subscription failed: {reason}");
                self.drop_subscription();
                Some(SubscriberState::Faulted)
            }
            Delivery::Cancelled => None,
        }
    }

    fn drop_subscription(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
    }

    fn dispatch(&mut self, log: Log) {
        if log.removed {
            tracing::debug!("skipping removed log in block {:?}", log.block_number);
            return;
        }

        if !self.dedupe.should_forward(&log) {
            tracing::debug!("skipping duplicate log {:?}", log.transaction_hash);
            return;
        }

        if let Some(block) = log.block_number {
            self.last_seen_block = Some(self.last_seen_block.map_or(block, |seen| seen.max(block)));
        }

        match classify(&log) {
            Ok(event) => {
                if let ChainEvent::OracleRequest(request) = &event {
                    if let Err(err) = &request.params {
                        tracing::warn!(
                            request_id = %request.request_id,
                            "failed to decode request payload: {err}"
                        );
                    }
                }

                tracing::info!(
                    kind = event.kind(),
                    id = %event.request_id(),
                    block = ?event.meta().block_number,
                    "chain event"
                );

                match self.events_tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => tracing::warn!(
                        kind = event.kind(),
                        id = %event.request_id(),
                        "chain event buffer full, dropping event"
                    ),
                    Err(TrySendError::Closed(_)) => tracing::debug!("no consumer for chain events"),
                }
            }
            Err(err) => tracing::error!("{err}"),
        }
    }
}

/// Watches every contract bound on this connection for the three known events.
pub fn log_filter<C: NodeClient>(handle: &ConnectionHandle<C>) -> Result<Filter, ChainError> {
    let addresses = handle.monitored_addresses();
    if addresses.is_empty() {
        return Err(ChainError::NoBindings(handle.generation()));
    }

    Ok(Filter::new()
        .address(addresses)
        .event_signature(supported_event_signatures()))
}
