mod functions_client {
    use alloy_sol_types::sol;

    sol!(
        #[allow(missing_docs)]
        #[derive(Debug, PartialEq, Eq)]
        event RequestSent(bytes32 indexed id);

        #[allow(missing_docs)]
        #[derive(Debug, PartialEq, Eq)]
        event RequestFulfilled(bytes32 indexed id, bytes result);
    );
}

mod functions_oracle {
    use alloy_sol_types::sol;

    sol!(
        #[allow(missing_docs)]
        #[derive(Debug, PartialEq, Eq)]
        event OracleRequest(
            bytes32 indexed requestId,
            address requestingContract,
            address requestInitiator,
            uint64 subscriptionId,
            address subscriptionOwner,
            bytes data
        );
    );
}

/// Raw solidity events as emitted by the monitored contracts.
pub mod solidity {
    pub use super::functions_client::{RequestFulfilled, RequestSent};
    pub use super::functions_oracle::OracleRequest;
}

use alloy_primitives::B256;
use alloy_sol_types::SolEvent;
use serde::{Deserialize, Serialize};

/// The two contracts a connection is bound to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    FunctionsClient,
    FunctionsOracle,
}

impl ContractKind {
    pub const ALL: [ContractKind; 2] = [ContractKind::FunctionsClient, ContractKind::FunctionsOracle];
}

impl std::fmt::Display for ContractKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractKind::FunctionsClient => write!(f, "FunctionsClient"),
            ContractKind::FunctionsOracle => write!(f, "FunctionsOracle"),
        }
    }
}

/// Topic-0 values of every event the bridge knows how to classify.
pub fn supported_event_signatures() -> Vec<B256> {
    vec![
        solidity::RequestSent::SIGNATURE_HASH,
        solidity::RequestFulfilled::SIGNATURE_HASH,
        solidity::OracleRequest::SIGNATURE_HASH,
    ]
}
