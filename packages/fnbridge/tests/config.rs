use std::path::PathBuf;

use fnbridge::{
    args::CliArgs,
    config::{BasicAuthCredentials, Config},
    subsystems::chain::ChainSettings,
};
use utils::config::{CliEnvExt, ConfigBuilder, ConfigExt};

const CONFIG_TOML: &str = r#"
[default]
log_level = ["info"]

[fnbridge]
node_endpoint = "wss://node.internal:8546"
functions_client_address = "0x00000000000000000000000000000000000000a1"
functions_oracle_address = "0x00000000000000000000000000000000000000b1"
functions_provider_url = "http://fn.internal:8080/"
upstream_timeout_secs = 30
backfill_on_reconnect = true

[fnbridge.provider_basic_auth]
username = "bridge"
password = "hunter2"
"#;

fn write_config(contents: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(Config::FILENAME), contents).unwrap();
    dir
}

fn cli_args(home: &tempfile::TempDir) -> CliArgs {
    CliArgs {
        home: Some(home.path().to_path_buf()),
        // does not exist, keeps a stray .env out of the test
        dotenv: Some(PathBuf::from("/nonexistent/.env")),
        ..Default::default()
    }
}

fn env_var(name: &str) -> String {
    format!("{}_{}", CliArgs::ENV_VAR_PREFIX, name)
}

fn build(args: CliArgs) -> Config {
    ConfigBuilder::new(args).build().unwrap()
}

#[test]
fn file_section_overrides_defaults() {
    let home = write_config(CONFIG_TOML);

    let config = temp_env::with_vars_unset(
        [env_var("UPSTREAM_TIMEOUT_SECS"), env_var("NODE_ENDPOINT")],
        || build(cli_args(&home)),
    );

    assert_eq!(config.node_endpoint, "wss://node.internal:8546");
    assert_eq!(config.upstream_timeout_secs, 30);
    assert!(config.backfill_on_reconnect);
    assert_eq!(
        config.provider_basic_auth,
        Some(BasicAuthCredentials {
            username: "bridge".to_string(),
            password: Some("hunter2".to_string()),
        })
    );

    // not in the file
    let defaults = Config::default();
    assert_eq!(config.subscribe_attempts, defaults.subscribe_attempts);
    assert_eq!(config.reconnect_max_delay_ms, defaults.reconnect_max_delay_ms);
    assert_eq!(config.queue_capacity, defaults.queue_capacity);

    config.validate().unwrap();
}

#[test]
fn env_then_cli_override_file() {
    let home = write_config(CONFIG_TOML);

    temp_env::with_vars(
        [
            (env_var("UPSTREAM_TIMEOUT_SECS"), Some("5")),
            (env_var("NODE_ENDPOINT"), Some("ws://from-env:8546")),
        ],
        || {
            let config = build(cli_args(&home));
            assert_eq!(config.upstream_timeout_secs, 5);
            assert_eq!(config.node_endpoint, "ws://from-env:8546");

            let config = build(CliArgs {
                node_endpoint: Some("ws://from-cli:8546".to_string()),
                ..cli_args(&home)
            });
            assert_eq!(config.upstream_timeout_secs, 5);
            assert_eq!(config.node_endpoint, "ws://from-cli:8546");
        },
    );
}

#[test]
fn log_level_from_env() {
    let home = write_config(CONFIG_TOML);

    let config = temp_env::with_var(env_var("LOG_LEVEL"), Some("info, fnbridge=debug"), || {
        build(cli_args(&home))
    });

    assert_eq!(config.log_level, ["info", "fnbridge=debug"]);
    config.tracing_env_filter().unwrap();
}

#[test]
fn home_env_var_locates_file() {
    let home = write_config(CONFIG_TOML);

    let config = temp_env::with_var(env_var("HOME"), Some(home.path()), || {
        build(CliArgs {
            dotenv: Some(PathBuf::from("/nonexistent/.env")),
            ..Default::default()
        })
    });

    assert_eq!(config.functions_provider_url, "http://fn.internal:8080/");
}

#[test]
fn chain_settings_follow_config() {
    let home = write_config(CONFIG_TOML);
    let config = temp_env::with_vars_unset([env_var("NODE_ENDPOINT")], || build(cli_args(&home)));

    let settings = ChainSettings::from(&config);
    assert_eq!(settings.endpoint, "wss://node.internal:8546");
    assert_eq!(settings.reconnect.max_attempts, None);
    assert_eq!(settings.subscribe.max_attempts, Some(5));
    assert_eq!(settings.backfill.map(|b| b.chunk_size), Some(2_000));
}

fn valid() -> Config {
    Config {
        functions_client_address: "0x00000000000000000000000000000000000000a1".to_string(),
        functions_oracle_address: "0x00000000000000000000000000000000000000b1".to_string(),
        ..Default::default()
    }
}

#[test]
fn validate_rejects_bad_values() {
    valid().validate().unwrap();

    // addresses have no default
    assert!(Config::default().validate().is_err());

    let http_node = Config {
        node_endpoint: "http://127.0.0.1:8545".to_string(),
        ..valid()
    };
    assert!(http_node.validate().is_err());

    let empty_provider = Config {
        functions_provider_url: " ".to_string(),
        ..valid()
    };
    assert!(empty_provider.validate().is_err());

    let ftp_provider = Config {
        functions_provider_url: "ftp://fn.internal".to_string(),
        ..valid()
    };
    assert!(ftp_provider.validate().is_err());

    let no_queue = Config {
        queue_capacity: 0,
        ..valid()
    };
    assert!(no_queue.validate().is_err());

    let no_timeout = Config {
        upstream_timeout_secs: 0,
        ..valid()
    };
    assert!(no_timeout.validate().is_err());
}
