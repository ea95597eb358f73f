use std::{sync::Arc, time::Duration};

use alloy_primitives::{Bytes, B256};
use fnbridge_types::{ChainEvent, ContractKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    backfill::BackfillSettings,
    connection::{ConnectionManager, MonitoredContracts},
    error::ChainError,
    retry::RetryPolicy,
    subscription::{log_filter, LogSubscriber, SubscriberChannels, SubscriberState},
    ChainSubsystem,
};
use crate::{
    init_tracing_tests,
    test_utils::{
        logs::{request_fulfilled_log, request_sent_log, unknown_log, FUNCTIONS_CLIENT},
        mock_transport::MockTransport,
        test_contracts, test_settings, MOCK_ENDPOINT,
    },
};

const WAIT: Duration = Duration::from_secs(10);

async fn next_event(rx: &mut mpsc::Receiver<ChainEvent>) -> ChainEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for chain event")
        .expect("event channel closed")
}

async fn wait_state(chain: &ChainSubsystem<MockTransport>, state: SubscriberState) {
    let mut watch = chain.state.clone();
    tokio::time::timeout(WAIT, watch.wait_for(state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"));
}

fn spawn_chain(
    transport: &MockTransport,
    backfill: Option<BackfillSettings>,
) -> (ChainSubsystem<MockTransport>, mpsc::Receiver<ChainEvent>) {
    let (events_tx, events_rx) = mpsc::channel(64);
    let mut settings = test_settings();
    settings.backfill = backfill;

    let chain = ChainSubsystem::spawn(
        transport.clone(),
        settings,
        events_tx,
        CancellationToken::new(),
    );
    (chain, events_rx)
}

#[tokio::test]
async fn processes_events_across_a_fault() {
    init_tracing_tests();

    let transport = MockTransport::new();
    let (chain, mut events) = spawn_chain(&transport, None);
    wait_state(&chain, SubscriberState::Subscribed).await;

    let mut transitions = chain.state.transitions();

    for i in 1..=3u8 {
        assert!(transport.emit(request_sent_log(B256::repeat_byte(i), i as u64, 0)));
    }
    assert!(transport.fault("websocket closed"));

    for i in 1..=3u8 {
        assert_eq!(next_event(&mut events).await.request_id(), B256::repeat_byte(i));
    }

    let mut seen = Vec::new();
    while seen.last() != Some(&SubscriberState::Subscribed) {
        let state = tokio::time::timeout(WAIT, transitions.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(state);
    }
    assert_eq!(
        seen,
        [
            SubscriberState::Faulted,
            SubscriberState::AwaitingConnection,
            SubscriberState::Subscribing,
            SubscriberState::Subscribed,
        ]
    );
    assert_eq!(transport.connections(), 2);
    assert_eq!(transport.torn_down(), 1);

    assert!(transport.emit(request_sent_log(B256::repeat_byte(4), 4, 0)));
    assert_eq!(next_event(&mut events).await.request_id(), B256::repeat_byte(4));

    chain.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn subscribe_retries_stay_within_policy() {
    init_tracing_tests();

    let transport = MockTransport::new();
    transport.fail_next_subscribes(2);

    let (chain, _events) = spawn_chain(&transport, None);
    wait_state(&chain, SubscriberState::Subscribed).await;

    let policy = test_settings().subscribe;
    let attempts = transport.subscribe_attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.len() <= policy.max_attempts.unwrap());
    for gap in attempts.windows(2).map(|w| w[1] - w[0]) {
        assert!(gap <= policy.max_delay, "gap {gap:?} exceeds {:?}", policy.max_delay);
    }
    assert_eq!(transport.connections(), 1);

    chain.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_subscribe_redials() {
    init_tracing_tests();

    let transport = MockTransport::new();
    transport.fail_next_subscribes(5);

    let (chain, _events) = spawn_chain(&transport, None);
    wait_state(&chain, SubscriberState::Subscribed).await;

    assert_eq!(transport.subscribe_attempts().len(), 6);
    assert_eq!(transport.connections(), 2);
    assert_eq!(chain.connections.current().unwrap().generation(), 2);

    chain.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn dial_retries_until_connected() {
    init_tracing_tests();

    let transport = MockTransport::new();
    transport.fail_next_dials(3);

    let (chain, _events) = spawn_chain(&transport, None);
    wait_state(&chain, SubscriberState::Subscribed).await;

    assert_eq!(transport.dial_attempts(), 4);
    assert_eq!(transport.connections(), 1);

    let filter = transport.last_filter().unwrap();
    let handle = chain.connections.current().unwrap();
    assert_eq!(log_filter(&handle).unwrap(), filter);

    chain.shutdown().await;
}

#[tokio::test]
async fn unknown_events_do_not_stall_the_stream() {
    init_tracing_tests();

    let transport = MockTransport::new();
    let (chain, mut events) = spawn_chain(&transport, None);
    wait_state(&chain, SubscriberState::Subscribed).await;

    assert!(transport.emit(unknown_log(1)));
    assert!(transport.emit(request_fulfilled_log(
        B256::repeat_byte(2),
        Bytes::from_static(b"done"),
        2,
        0
    )));

    let event = next_event(&mut events).await;
    assert_eq!(event.kind(), "RequestFulfilled");
    assert_eq!(chain.state.get(), SubscriberState::Subscribed);
    assert_eq!(transport.subscriptions_opened(), 1);

    chain.shutdown().await;
}

#[tokio::test]
async fn closed_stream_resubscribes() {
    init_tracing_tests();

    let transport = MockTransport::new();
    let (chain, mut events) = spawn_chain(&transport, None);
    wait_state(&chain, SubscriberState::Subscribed).await;

    assert!(transport.close_stream());
    transport.wait_for_subscriptions(2, WAIT).await.unwrap();
    wait_state(&chain, SubscriberState::Subscribed).await;

    assert!(transport.emit(request_sent_log(B256::repeat_byte(9), 9, 0)));
    assert_eq!(next_event(&mut events).await.request_id(), B256::repeat_byte(9));

    chain.shutdown().await;
}

#[tokio::test]
async fn backfill_recovers_missed_logs_once() {
    init_tracing_tests();

    let transport = MockTransport::new();
    let (chain, mut events) = spawn_chain(&transport, Some(BackfillSettings { chunk_size: 10 }));
    wait_state(&chain, SubscriberState::Subscribed).await;

    let first = request_sent_log(B256::repeat_byte(1), 1, 0);
    assert!(transport.emit(first.clone()));
    assert_eq!(next_event(&mut events).await.request_id(), B256::repeat_byte(1));

    // emitted while the subscription is down
    let missed = request_sent_log(B256::repeat_byte(3), 3, 0);
    transport.set_history(
        vec![
            first,
            request_sent_log(B256::repeat_byte(2), 2, 0),
            missed.clone(),
        ],
        3,
    );

    assert!(transport.fault("node restarted"));
    transport.wait_for_subscriptions(2, WAIT).await.unwrap();
    wait_state(&chain, SubscriberState::Subscribed).await;

    assert_eq!(next_event(&mut events).await.request_id(), B256::repeat_byte(2));
    assert_eq!(next_event(&mut events).await.request_id(), B256::repeat_byte(3));

    // the live stream replays one the backfill already delivered
    assert!(transport.emit(missed));
    assert!(transport.emit(request_sent_log(B256::repeat_byte(4), 4, 0)));
    assert_eq!(next_event(&mut events).await.request_id(), B256::repeat_byte(4));
    assert!(events.try_recv().is_err());
    assert_eq!(transport.get_logs_calls(), 1);

    chain.shutdown().await;
}

#[tokio::test]
async fn backfill_covers_a_fault_before_any_event() {
    init_tracing_tests();

    let transport = MockTransport::new();
    let (chain, mut events) = spawn_chain(&transport, Some(BackfillSettings { chunk_size: 10 }));
    wait_state(&chain, SubscriberState::Subscribed).await;

    // nothing dispatched yet, the head at subscribe time is the only position
    transport.set_history(vec![request_sent_log(B256::repeat_byte(2), 2, 0)], 2);

    assert!(transport.fault("node restarted"));
    transport.wait_for_subscriptions(2, WAIT).await.unwrap();

    assert_eq!(next_event(&mut events).await.request_id(), B256::repeat_byte(2));
    assert_eq!(transport.get_logs_calls(), 1);

    chain.shutdown().await;
}

fn manager(transport: &MockTransport) -> Arc<ConnectionManager<MockTransport>> {
    Arc::new(ConnectionManager::new(
        transport.clone(),
        MOCK_ENDPOINT,
        test_contracts(),
        test_settings().reconnect,
    ))
}

#[tokio::test]
async fn lost_connection_manager_is_fatal() {
    init_tracing_tests();

    let transport = MockTransport::new();
    let (renew_tx, renew_rx) = mpsc::channel(1);
    let (_ready_tx, ready_rx) = mpsc::channel(1);
    let (events_tx, _events_rx) = mpsc::channel(8);
    drop(renew_rx);

    let (subscriber, state) = LogSubscriber::new(
        manager(&transport),
        SubscriberChannels {
            renew_tx,
            ready_rx,
            events_tx,
        },
        test_settings().subscribe,
        None,
    );

    let result = tokio::time::timeout(WAIT, subscriber.run(CancellationToken::new()))
        .await
        .unwrap();
    assert!(matches!(result, Err(ChainError::ChannelClosed(_))), "{result:?}");
    assert_eq!(state.get(), SubscriberState::Unconnected);
    assert_eq!(transport.dial_attempts(), 0);
}

#[tokio::test]
async fn closed_channels_during_shutdown_are_not_fatal() {
    init_tracing_tests();

    let transport = MockTransport::new();
    let (renew_tx, renew_rx) = mpsc::channel(1);
    let (ready_tx, ready_rx) = mpsc::channel(1);
    let (events_tx, _events_rx) = mpsc::channel(8);
    drop(renew_rx);
    drop(ready_tx);

    let (subscriber, _state) = LogSubscriber::new(
        manager(&transport),
        SubscriberChannels {
            renew_tx,
            ready_rx,
            events_tx,
        },
        test_settings().subscribe,
        None,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = tokio::time::timeout(WAIT, subscriber.run(cancel)).await.unwrap();
    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn crashed_renewal_task_is_fatal() {
    init_tracing_tests();

    let transport = MockTransport::new();
    transport.panic_on_dial();
    let connections = manager(&transport);

    let cancel = CancellationToken::new();
    let (renew_tx, renew_rx) = mpsc::channel(1);
    let (ready_tx, ready_rx) = mpsc::channel(1);
    let (events_tx, _events_rx) = mpsc::channel(8);
    let renewal = connections
        .clone()
        .spawn_renewal_loop(renew_rx, ready_tx, cancel.clone());

    let (subscriber, state) = LogSubscriber::new(
        connections,
        SubscriberChannels {
            renew_tx,
            ready_rx,
            events_tx,
        },
        test_settings().subscribe,
        None,
    );

    let result = tokio::time::timeout(WAIT, subscriber.run(cancel.clone()))
        .await
        .unwrap();
    assert!(
        matches!(result, Err(ChainError::ChannelClosed("connection ready"))),
        "{result:?}"
    );
    assert_eq!(state.get(), SubscriberState::AwaitingConnection);
    assert!(renewal.await.unwrap_err().is_panic());
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn shutdown_tears_down_once() {
    init_tracing_tests();

    let transport = MockTransport::new();
    let (chain, _events) = spawn_chain(&transport, None);
    wait_state(&chain, SubscriberState::Subscribed).await;

    let connections = chain.connections.clone();
    chain.shutdown().await;

    assert!(connections.current().is_none());
    assert_eq!(transport.torn_down(), 1);

    // second call is a no-op
    connections.teardown();
    assert!(connections.current().is_none());
}

#[tokio::test]
async fn degraded_handle_keeps_the_good_binding() {
    init_tracing_tests();

    let transport = MockTransport::new();
    let manager = ConnectionManager::new(
        transport.clone(),
        MOCK_ENDPOINT,
        MonitoredContracts {
            functions_client: FUNCTIONS_CLIENT.to_string(),
            functions_oracle: "not-an-address".to_string(),
        },
        test_settings().reconnect,
    );

    let handle = manager.connect(&CancellationToken::new()).await.unwrap();
    assert!(handle.binding(ContractKind::FunctionsOracle).is_none());
    let binding = handle.binding(ContractKind::FunctionsClient).unwrap();
    assert_eq!(binding.address(), FUNCTIONS_CLIENT);
    assert_eq!(handle.monitored_addresses(), [FUNCTIONS_CLIENT]);
    assert!(log_filter(&handle).is_ok());
}

#[tokio::test]
async fn no_bindings_cannot_be_watched() {
    let transport = MockTransport::new();
    let manager = ConnectionManager::new(
        transport,
        MOCK_ENDPOINT,
        MonitoredContracts {
            functions_client: "0x0000000000000000000000000000000000000000".to_string(),
            functions_oracle: String::new(),
        },
        test_settings().reconnect,
    );

    let handle = manager.connect(&CancellationToken::new()).await.unwrap();
    assert_eq!(handle.bindings().count(), 0);
    assert!(matches!(log_filter(&handle), Err(ChainError::NoBindings(1))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_torn_handle() {
    let transport = MockTransport::new();
    let manager = Arc::new(ConnectionManager::new(
        transport,
        MOCK_ENDPOINT,
        test_contracts(),
        RetryPolicy::unbounded(Duration::from_millis(1), Duration::from_millis(1)),
    ));
    let cancel = CancellationToken::new();
    manager.connect(&cancel).await.unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut samples = 0u64;
                loop {
                    let handle = manager.current().unwrap();
                    assert_eq!(handle.client().id(), handle.generation());
                    for binding in handle.bindings() {
                        assert_eq!(binding.generation(), handle.generation());
                        assert_eq!(binding.client().id(), handle.generation());
                    }
                    assert_eq!(handle.bindings().count(), 2);
                    samples += 1;
                    if cancel.is_cancelled() {
                        break samples;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for _ in 0..200 {
        manager.connect(&cancel).await.unwrap();
        tokio::task::yield_now().await;
    }
    cancel.cancel();

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
    assert_eq!(manager.current().unwrap().generation(), 201);
}
