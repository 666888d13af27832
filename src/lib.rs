//! Move CTF Flag Gateway
//!
//! Verifies a player's Sui transaction and contract flag, and releases the
//! challenge reward token when both check out.
//!
//! ## Module Structure
//!
//! - `config`: Runtime configuration and challenge modes
//! - `credentials`: Reward token and participant id loading
//! - `ledger`: Sui JSON-RPC transaction lookup
//! - `validator`: Ordered transaction checks and the combined verdict
//! - `publisher`: Contract publishing via the Sui CLI and the deployment cache
//! - `server`: HTTP surface

pub mod config;
pub mod credentials;
pub mod ledger;
pub mod publisher;
pub mod server;
pub mod validator;

pub use config::{ChallengeMode, GatewayConfig};
pub use credentials::Credentials;
pub use ledger::{LedgerClient, LedgerError, TransactionRecord};
pub use publisher::{
    parse_publish_output, ContractPublisher, DeployOutcome, Deployment, PublishError,
    PublishedContract, SuiCliPublisher,
};
pub use server::{router, run_server, AppState};
pub use validator::{validate_transaction, CheckContext, Rejection, Verdict};
