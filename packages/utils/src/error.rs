use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvmClientError {
    #[error("Unable to parse endpoint: {0}")]
    ParseEndpoint(String),

    #[error("Unable to create web socket provider: {0:#?}")]
    WebSocketProvider(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Unable to build OTLP exporter: {0}")]
    Exporter(String),

    #[error("Unable to install tracing subscriber: {0}")]
    Subscriber(String),
}
