pub mod logs;
pub mod mock_transport;

use std::time::Duration;

use crate::subsystems::chain::{
    connection::MonitoredContracts, retry::RetryPolicy, ChainSettings,
};

pub const MOCK_ENDPOINT: &str = "ws://mock-node:8546";

pub fn test_contracts() -> MonitoredContracts {
    MonitoredContracts {
        functions_client: logs::FUNCTIONS_CLIENT.to_string(),
        functions_oracle: logs::FUNCTIONS_ORACLE.to_string(),
    }
}

/// Short reconnect delays, the default subscribe policy, no backfill.
pub fn test_settings() -> ChainSettings {
    ChainSettings {
        endpoint: MOCK_ENDPOINT.to_string(),
        contracts: test_contracts(),
        reconnect: RetryPolicy::unbounded(Duration::from_millis(10), Duration::from_millis(100)),
        subscribe: RetryPolicy::bounded(5, Duration::from_millis(100), Duration::from_millis(300)),
        backfill: None,
    }
}
