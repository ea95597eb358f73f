use alloy_provider::{DynProvider, ProviderBuilder, WsConnect};
use std::str::FromStr;

use crate::error::EvmClientError;

/// A node endpoint. Log subscriptions need a push transport, so only the
/// websocket flavor can be turned into a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvmEndpoint {
    WebSocket(reqwest::Url),
    Http(reqwest::Url),
}

impl FromStr for EvmEndpoint {
    type Err = EvmClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url =
            reqwest::Url::parse(s).map_err(|e| EvmClientError::ParseEndpoint(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(EvmEndpoint::WebSocket(url)),
            "http" | "https" => Ok(EvmEndpoint::Http(url)),
            scheme => Err(EvmClientError::ParseEndpoint(format!(
                "could not determine endpoint from scheme {scheme} (full url: {s})"
            ))),
        }
    }
}

impl std::fmt::Display for EvmEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url())
    }
}

impl EvmEndpoint {
    pub fn new_ws(url: &str) -> Result<Self, EvmClientError> {
        match url.parse::<Self>()? {
            endpoint @ EvmEndpoint::WebSocket(_) => Ok(endpoint),
            EvmEndpoint::Http(_) => Err(EvmClientError::ParseEndpoint(format!(
                "log subscriptions need a ws or wss endpoint, got {url}"
            ))),
        }
    }

    pub fn url(&self) -> &reqwest::Url {
        match self {
            EvmEndpoint::WebSocket(url) | EvmEndpoint::Http(url) => url,
        }
    }

    pub async fn to_provider(&self) -> Result<DynProvider, EvmClientError> {
        match self {
            EvmEndpoint::WebSocket(url) => {
                let ws = WsConnect::new(url.clone());
                Ok(DynProvider::new(
                    ProviderBuilder::new()
                        .connect_ws(ws)
                        .await
                        .map_err(|e| EvmClientError::WebSocketProvider(e.into()))?,
                ))
            }
            EvmEndpoint::Http(url) => Err(EvmClientError::ParseEndpoint(format!(
                "{url} cannot carry log subscriptions"
            ))),
        }
    }
}
