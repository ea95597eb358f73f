use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utils::{config::CliEnvExt, serde::deserialize_vec_string};

/// This struct is used for both args and environment variables
/// the basic idea is that every env var can be overriden by a cli arg
/// and these override the config file
/// env vars follow the pattern of FNBRIDGE_{UPPERCASE_ARG_NAME}
#[derive(Debug, Parser, Serialize, Deserialize, Default)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct CliArgs {
    /// The home directory of the application, where the fnbridge.toml configuration file is stored
    /// if not provided here or in an env var, a series of default directories will be tried
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,

    /// The path to an optional dotenv file to try and load
    /// if not set, will be the current working directory's .env
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dotenv: Option<PathBuf>,

    /// Log level in the format of comma-separated tracing directives.
    #[arg(long, value_delimiter = ',')]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(deserialize_with = "deserialize_vec_string")]
    pub log_level: Vec<String>,

    /// OTLP collector to export traces to
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jaeger: Option<String>,

    /// Websocket endpoint of the node to watch
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_endpoint: Option<String>,

    /// Address of the FunctionsClient contract
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions_client_address: Option<String>,

    /// Address of the FunctionsOracle contract
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions_oracle_address: Option<String>,

    /// Base URL that function request paths are appended to
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions_provider_url: Option<String>,

    /// Seconds to wait for a function to answer
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_timeout_secs: Option<u64>,

    /// Query logs missed during a node outage after every resubscribe
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backfill_on_reconnect: Option<bool>,
}

impl CliEnvExt for CliArgs {
    const ENV_VAR_PREFIX: &'static str = "FNBRIDGE";
    const TOML_IDENTIFIER: &'static str = "fnbridge";

    fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone()
    }

    fn dotenv_path(&self) -> Option<PathBuf> {
        self.dotenv.clone()
    }
}
