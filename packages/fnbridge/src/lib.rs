pub mod args;
pub mod config;
pub mod publish; // the inbound / outbound queue pair
pub mod subsystems;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use config::Config;
use fnbridge_types::FulfilledRequest;
use publish::{ChannelPublisher, PublisherChannels};
use subsystems::{
    chain::{
        transport::{EvmTransport, NodeTransport},
        ChainSettings, ChainSubsystem, EVENT_BUFFER,
    },
    fulfillment::{upstream::Upstream, FulfillmentBridge},
    router::RequestRouter,
};
use tokio::sync::mpsc;
use tracing::instrument;
use utils::context::AppContext;

#[cfg(debug_assertions)]
pub use utils::init_tracing_tests;

/// Entry point to start up the whole bridge
/// Called from main and end-to-end tests, returns once the context is killed
pub fn run_bridge(ctx: AppContext, config: Config) -> Result<()> {
    let _ = ctrlc::set_handler({
        let ctx = ctx.clone();
        move || {
            ctx.kill();
        }
    });

    let rt = ctx.rt.clone();
    rt.block_on(run_bridge_with(ctx, config, EvmTransport));

    Ok(())
}

/// Runs every subsystem over `transport` until the context is killed.
pub async fn run_bridge_with<T: NodeTransport>(ctx: AppContext, config: Config, transport: T) {
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let chain = ChainSubsystem::spawn(
        transport,
        ChainSettings::from(&config),
        events_tx,
        ctx.shutdown_token(),
    );

    let (publisher, channels) = ChannelPublisher::new(config.queue_capacity);
    let PublisherChannels {
        inbound_tx,
        outbound_rx,
    } = channels;

    let router = tokio::spawn(RequestRouter::new(events_rx, inbound_tx).run(ctx.shutdown_token()));

    let bridge = tokio::spawn({
        let bridge = FulfillmentBridge::new(Arc::new(publisher), Upstream::from_config(&config));
        let cancel = ctx.shutdown_token();
        async move { bridge.run(cancel).await }
    });

    let sink = tokio::spawn(log_fulfillments(outbound_rx));

    ctx.shutdown_token().cancelled().await;
    tracing::info!("shutting down");

    for (name, task) in [("router", router), ("bridge", bridge)] {
        if let Err(err) = task.await {
            tracing::error!("{name} task failed: {err}");
        }
    }
    // the bridge held the last sender, so the sink drains and exits
    if let Err(err) = sink.await {
        tracing::error!("fulfillment sink failed: {err}");
    }

    chain.shutdown().await;
}

/// Stands in for the on-chain writer, which lives outside this process.
#[instrument(skip_all, fields(subsys = "Fulfillment"))]
async fn log_fulfillments(mut outbound_rx: mpsc::Receiver<FulfilledRequest>) {
    while let Some(fulfilled) = outbound_rx.recv().await {
        match fulfilled.err_text() {
            None => tracing::info!(
                request_id = %fulfilled.request_id,
                resp_len = fulfilled.resp.as_ref().map_or(0, |r| r.len()),
                "request fulfilled"
            ),
            Some(err) => tracing::warn!(
                request_id = %fulfilled.request_id,
                "request failed: {err}"
            ),
        }
    }
}
