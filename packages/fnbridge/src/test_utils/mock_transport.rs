use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_rpc_types_eth::{Filter, Log};
use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

use crate::subsystems::chain::{
    error::ChainError,
    transport::{LogSubscription, NodeClient, NodeTransport, SubscriptionFault},
};

/// A scripted node. Clones share state, so a test keeps one copy to drive
/// the node while the subsystem under test owns another.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockNode>>,
}

#[derive(Default)]
struct MockNode {
    dial_panics: bool,
    dial_failures: usize,
    subscribe_failures: usize,
    dial_attempts: usize,
    connections: u64,
    subscribe_attempts: Vec<Instant>,
    subscriptions_opened: usize,
    filters: Vec<Filter>,
    live: Option<LiveSubscription>,
    // faulted subscriptions keep their log sender so only the error path fires
    retired: Vec<mpsc::UnboundedSender<Log>>,
    torn_down: usize,
    history: Vec<Log>,
    head: u64,
    get_logs_calls: usize,
}

struct LiveSubscription {
    logs: mpsc::UnboundedSender<Log>,
    fault: oneshot::Sender<SubscriptionFault>,
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum WaitError {
    #[error("Waiting timed out")]
    Timeout,
}

impl MockTransport {
    const POLL: Duration = Duration::from_millis(5);

    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockNode::default())),
        }
    }

    /// The next `n` dials fail.
    pub fn fail_next_dials(&self, n: usize) {
        self.inner.lock().unwrap().dial_failures = n;
    }

    /// Every dial panics, taking the dialing task down with it.
    pub fn panic_on_dial(&self) {
        self.inner.lock().unwrap().dial_panics = true;
    }

    /// The next `n` subscribe calls fail.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.inner.lock().unwrap().subscribe_failures = n;
    }

    pub fn dial_attempts(&self) -> usize {
        self.inner.lock().unwrap().dial_attempts
    }

    /// Successful dials so far.
    pub fn connections(&self) -> u64 {
        self.inner.lock().unwrap().connections
    }

    pub fn subscribe_attempts(&self) -> Vec<Instant> {
        self.inner.lock().unwrap().subscribe_attempts.clone()
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.inner.lock().unwrap().subscriptions_opened
    }

    pub fn last_filter(&self) -> Option<Filter> {
        self.inner.lock().unwrap().filters.last().cloned()
    }

    /// Subscriptions released by their owner.
    pub fn torn_down(&self) -> usize {
        self.inner.lock().unwrap().torn_down
    }

    pub async fn wait_for_subscriptions(&self, n: usize, timeout: Duration) -> Result<(), WaitError> {
        let end = Instant::now() + timeout;
        while Instant::now() < end {
            if self.subscriptions_opened() >= n {
                return Ok(());
            }
            tokio::time::sleep(Self::POLL).await;
        }
        Err(WaitError::Timeout)
    }

    /// Pushes a log into the live subscription. False if there is none.
    pub fn emit(&self, log: Log) -> bool {
        match &self.inner.lock().unwrap().live {
            Some(live) => live.logs.send(log).is_ok(),
            None => false,
        }
    }

    /// Fails the live subscription the way a dropped websocket would.
    pub fn fault(&self, reason: &str) -> bool {
        let mut node = self.inner.lock().unwrap();
        match node.live.take() {
            Some(LiveSubscription { logs, fault }) => {
                node.retired.push(logs);
                fault.send(SubscriptionFault::Stream(reason.to_string())).is_ok()
            }
            None => false,
        }
    }

    /// Ends the live log stream without an error.
    pub fn close_stream(&self) -> bool {
        self.inner.lock().unwrap().live.take().is_some()
    }

    pub fn set_history(&self, logs: Vec<Log>, head: u64) {
        let mut node = self.inner.lock().unwrap();
        node.history = logs;
        node.head = head;
    }

    pub fn get_logs_calls(&self) -> usize {
        self.inner.lock().unwrap().get_logs_calls
    }
}

#[async_trait]
impl NodeTransport for MockTransport {
    type Client = MockNodeClient;

    async fn dial(&self, endpoint: &str) -> Result<MockNodeClient, ChainError> {
        let mut node = self.inner.lock().unwrap();
        node.dial_attempts += 1;

        if node.dial_panics {
            // release the lock first so the mock stays usable
            drop(node);
            panic!("node transport crashed");
        }

        if node.dial_failures > 0 {
            node.dial_failures -= 1;
            return Err(ChainError::Dial {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        node.connections += 1;
        Ok(MockNodeClient::new(self.clone(), node.connections))
    }
}

/// A client from one successful dial. `id` is the dial's sequence number.
#[derive(Clone)]
pub struct MockNodeClient {
    transport: MockTransport,
    id: u64,
}

impl MockNodeClient {
    pub fn new(transport: MockTransport, id: u64) -> Self {
        Self { transport, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogSubscription, ChainError> {
        let mut node = self.transport.inner.lock().unwrap();
        node.subscribe_attempts.push(Instant::now());

        if node.subscribe_failures > 0 {
            node.subscribe_failures -= 1;
            return Err(ChainError::Subscribe("filter not found".to_string()));
        }

        let (logs_tx, logs_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = oneshot::channel();

        node.live = Some(LiveSubscription {
            logs: logs_tx,
            fault: fault_tx,
        });
        node.subscriptions_opened += 1;
        node.filters.push(filter.clone());

        let inner = self.transport.inner.clone();
        Ok(LogSubscription::new(logs_rx, fault_rx, move || {
            inner.lock().unwrap().torn_down += 1;
        }))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.transport.inner.lock().unwrap().head)
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        let mut node = self.transport.inner.lock().unwrap();
        node.get_logs_calls += 1;

        let from = filter.get_from_block().unwrap_or(0);
        let to = filter.get_to_block().unwrap_or(node.head);

        Ok(node
            .history
            .iter()
            .filter(|log| log.block_number.is_some_and(|b| b >= from && b <= to))
            .cloned()
            .collect())
    }
}
