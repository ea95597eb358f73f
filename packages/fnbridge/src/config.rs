use std::{str::FromStr, time::Duration};

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use utils::{config::ConfigExt, evm_client::EvmEndpoint};

/// The fully parsed config struct we use in the application
/// this is built up from the ConfigBuilder which can load from multiple sources (in order of preference):
///
/// 1. cli args
/// 2. environment variables
/// 3. config file
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// The log-level to use, in the format of [tracing directives](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#directives).
    /// Default is `["info"]`
    pub log_level: Vec<String>,
    /// OTLP collector for trace export, e.g. `http://localhost:4317`
    /// Default is `None` (console logging only)
    pub jaeger: Option<String>,

    /// Websocket endpoint of the node. Must be `ws://` or `wss://`.
    pub node_endpoint: String,
    pub functions_client_address: String,
    pub functions_oracle_address: String,

    /// Base URL of the function runtime. A trailing slash is ignored.
    pub functions_provider_url: String,
    /// Default is `60`
    pub upstream_timeout_secs: u64,
    /// Sent with every function call when set
    pub provider_basic_auth: Option<BasicAuthCredentials>,

    // reconnect backoff, retried without limit
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,

    // subscribe backoff, gives up after `subscribe_attempts` and redials
    pub subscribe_attempts: usize,
    pub subscribe_initial_delay_ms: u64,
    pub subscribe_max_delay_ms: u64,

    /// Capacity of the inbound and outbound request queues
    pub queue_capacity: usize,

    /// Default is `false`
    pub backfill_on_reconnect: bool,
    pub backfill_chunk_size: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BasicAuthCredentials {
    pub username: String,
    pub password: Option<String>,
}

/// Default values for the config struct
/// these are only used to fill in holes after all the parsing and loading is done
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: vec!["info".to_string()],
            jaeger: None,
            node_endpoint: "ws://127.0.0.1:8546".to_string(),
            functions_client_address: String::new(),
            functions_oracle_address: String::new(),
            functions_provider_url: "http://127.0.0.1:8080".to_string(),
            upstream_timeout_secs: 60,
            provider_basic_auth: None,
            reconnect_initial_delay_ms: 50,
            reconnect_max_delay_ms: 3_000,
            subscribe_attempts: 5,
            subscribe_initial_delay_ms: 100,
            subscribe_max_delay_ms: 300,
            queue_capacity: 64,
            backfill_on_reconnect: false,
            backfill_chunk_size: 2_000,
        }
    }
}

impl ConfigExt for Config {
    const FILENAME: &'static str = "fnbridge.toml";
    const DIRNAME: &'static str = "fnbridge";

    fn log_levels(&self) -> impl Iterator<Item = &str> {
        self.log_level.iter().map(|s| s.as_str())
    }
}

impl Config {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Catches what would otherwise only surface as an endless reconnect loop.
    pub fn validate(&self) -> Result<()> {
        EvmEndpoint::new_ws(&self.node_endpoint).context("node_endpoint")?;

        for (name, address) in [
            ("functions_client_address", &self.functions_client_address),
            ("functions_oracle_address", &self.functions_oracle_address),
        ] {
            Address::from_str(address.trim())
                .with_context(|| format!("{name} {address:?} is not an address"))?;
        }

        if self.functions_provider_url.trim().is_empty() {
            bail!("functions_provider_url is empty");
        }
        let url = reqwest::Url::parse(&self.functions_provider_url)
            .context("functions_provider_url")?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("functions_provider_url must be http or https, got {}", url.scheme());
        }

        if self.reconnect_initial_delay_ms == 0 || self.subscribe_initial_delay_ms == 0 {
            bail!("retry delays must be non-zero");
        }
        if self.upstream_timeout_secs == 0 {
            bail!("upstream_timeout_secs must be non-zero");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }

        Ok(())
    }
}
