//! Gateway Configuration
//!
//! Defines the runtime configuration for the verification gateway:
//! - Challenge mode (basic transaction check or deployed-contract check)
//! - Ledger RPC endpoint and timeout
//! - Credential file locations
//! - Contract publishing parameters

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default Sui full node used when no endpoint is configured
pub const DEFAULT_RPC_ENDPOINT: &str = "https://fullnode.testnet.sui.io:443";

/// Default secret the deployed contract hands back to the player
pub const DEFAULT_CONTRACT_FLAG: &str = "CTF{MoveCTF-Task2}";

/// Which set of transaction checks the gateway runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeMode {
    /// Status, events and participant only. No contract is published.
    Basic,
    /// Full check against a contract published by `/start_challenge`.
    #[default]
    Contract,
}

impl ChallengeMode {
    pub fn requires_contract(&self) -> bool {
        matches!(self, ChallengeMode::Contract)
    }
}

impl fmt::Display for ChallengeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeMode::Basic => write!(f, "basic"),
            ChallengeMode::Contract => write!(f, "contract"),
        }
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Check set to apply to submissions
    pub mode: ChallengeMode,
    /// Ledger node JSON-RPC endpoint
    pub rpc_endpoint: String,
    /// Per-call timeout for the ledger RPC
    pub rpc_timeout: Duration,
    /// Secret the player must copy out of the contract
    pub contract_flag: String,
    /// File holding the reward token
    pub root_flag_path: PathBuf,
    /// File holding the participant identifier
    pub uuid_path: PathBuf,
    /// Move package directory to publish
    pub contract_path: PathBuf,
    /// Gas budget passed to the publish command
    pub gas_budget: u64,
    /// Publishing tool executable
    pub sui_bin: String,
    /// Upper bound on a single publish run
    pub publish_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: ChallengeMode::default(),
            rpc_endpoint: DEFAULT_RPC_ENDPOINT.to_string(),
            rpc_timeout: Duration::from_secs(20),
            contract_flag: DEFAULT_CONTRACT_FLAG.to_string(),
            root_flag_path: PathBuf::from("/flag"),
            uuid_path: PathBuf::from("/uuid"),
            contract_path: PathBuf::from("./move_contract"),
            gas_budget: 100_000_000,
            sui_bin: "sui".to_string(),
            publish_timeout: Duration::from_secs(300),
        }
    }
}
