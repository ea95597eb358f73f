use async_trait::async_trait;
use fnbridge_types::FulfilledRequest;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// The queue pair the fulfillment bridge sits between.
#[async_trait]
pub trait Publish: Send + Sync {
    /// Next raw inbound message, `None` once the inbound side is closed.
    async fn receive(&self) -> Option<Vec<u8>>;

    async fn reply(&self, fulfilled: FulfilledRequest) -> Result<(), PublishError>;
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("outbound queue closed, dropped fulfillment for request {0}")]
    OutboundClosed(String),
}

/// In-process queues, bounded in both directions.
pub struct ChannelPublisher {
    inbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    outbound_tx: mpsc::Sender<FulfilledRequest>,
}

/// The ends of a `ChannelPublisher` held by everyone else.
pub struct PublisherChannels {
    pub inbound_tx: mpsc::Sender<Vec<u8>>,
    pub outbound_rx: mpsc::Receiver<FulfilledRequest>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, PublisherChannels) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        (
            Self {
                inbound_rx: Mutex::new(inbound_rx),
                outbound_tx,
            },
            PublisherChannels {
                inbound_tx,
                outbound_rx,
            },
        )
    }
}

#[async_trait]
impl Publish for ChannelPublisher {
    async fn receive(&self) -> Option<Vec<u8>> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn reply(&self, fulfilled: FulfilledRequest) -> Result<(), PublishError> {
        self.outbound_tx
            .send(fulfilled)
            .await
            .map_err(|e| PublishError::OutboundClosed(e.0.request_id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_close() {
        let (publisher, channels) = ChannelPublisher::new(2);
        let PublisherChannels {
            inbound_tx,
            mut outbound_rx,
        } = channels;

        inbound_tx.send(b"hello".to_vec()).await.unwrap();
        assert_eq!(publisher.receive().await.as_deref(), Some(&b"hello"[..]));

        publisher
            .reply(FulfilledRequest::success("r1", b"ok".to_vec()))
            .await
            .unwrap();
        assert_eq!(outbound_rx.recv().await.unwrap().request_id, "r1");

        drop(inbound_tx);
        assert!(publisher.receive().await.is_none());

        drop(outbound_rx);
        let err = publisher
            .reply(FulfilledRequest::failure("r2", "boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::OutboundClosed(id) if id == "r2"));
    }
}
