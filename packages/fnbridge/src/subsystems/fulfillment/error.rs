use reqwest::StatusCode;
use thiserror::Error;

/// How a function call failed. The `Display` text is what lands in the
/// fulfillment's `Err` field.
#[derive(Error, Debug)]
pub enum FulfillmentError {
    #[error("502 Bad Gateway: {0}")]
    Upstream(reqwest::Error),
    #[error("{status}: {source}")]
    ReadBody {
        status: StatusCode,
        source: reqwest::Error,
    },
    #[error("400 Bad Request: request body: {0}")]
    EncodeBody(serde_json::Error),
}
