//! Flag Gateway Server
//!
//! Serves the challenge page, verifies submissions against a Sui full node and
//! publishes the challenge contract on request.

use anyhow::Result;
use clap::Parser;
use flag_gateway::{
    config::{DEFAULT_CONTRACT_FLAG, DEFAULT_RPC_ENDPOINT},
    AppState, ChallengeMode, Credentials, GatewayConfig, SuiCliPublisher,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flag-gateway")]
#[command(about = "Move CTF verification gateway")]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8080", env = "CHALLENGE_PORT")]
    port: u16,

    /// Server host
    #[arg(long, default_value = "0.0.0.0", env = "CHALLENGE_HOST")]
    host: String,

    /// Which checks to run
    #[arg(long, value_enum, default_value_t = ChallengeMode::Contract, env = "CHALLENGE_MODE")]
    mode: ChallengeMode,

    /// Sui full node JSON-RPC endpoint
    #[arg(long, default_value = DEFAULT_RPC_ENDPOINT, env = "SUI_RPC_ENDPOINT")]
    rpc_endpoint: String,

    /// Ledger RPC timeout in seconds
    #[arg(long, default_value = "20", env = "RPC_TIMEOUT_SECS")]
    rpc_timeout_secs: u64,

    /// Flag the contract returns to the player
    #[arg(long, default_value = DEFAULT_CONTRACT_FLAG, env = "MOVE_CONTRACT_FLAG")]
    contract_flag: String,

    /// Reward token file
    #[arg(long, default_value = "/flag", env = "ROOT_FLAG_PATH")]
    root_flag_path: PathBuf,

    /// Participant id file
    #[arg(long, default_value = "/uuid", env = "UUID_FILE_PATH")]
    uuid_path: PathBuf,

    /// Move package to publish
    #[arg(long, default_value = "./move_contract", env = "MOVE_CONTRACT_PATH")]
    contract_path: PathBuf,

    /// Gas budget for publishing
    #[arg(long, default_value = "100000000", env = "SUI_GAS_BUDGET")]
    gas_budget: u64,

    /// Sui CLI executable
    #[arg(long, default_value = "sui", env = "SUI_BIN")]
    sui_bin: String,

    /// Publish timeout in seconds
    #[arg(long, default_value = "300", env = "PUBLISH_TIMEOUT_SECS")]
    publish_timeout_secs: u64,
}

impl From<Args> for GatewayConfig {
    fn from(args: Args) -> Self {
        Self {
            mode: args.mode,
            rpc_endpoint: args.rpc_endpoint,
            rpc_timeout: Duration::from_secs(args.rpc_timeout_secs),
            contract_flag: args.contract_flag,
            root_flag_path: args.root_flag_path,
            uuid_path: args.uuid_path,
            contract_path: args.contract_path,
            gas_budget: args.gas_budget,
            sui_bin: args.sui_bin,
            publish_timeout: Duration::from_secs(args.publish_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flag_gateway=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();
    let (host, port) = (args.host.clone(), args.port);
    let config = GatewayConfig::from(args);

    info!("Starting Flag Gateway");
    info!("  Mode: {}", config.mode);
    info!("  Ledger RPC: {}", config.rpc_endpoint);
    info!("  Contract path: {}", config.contract_path.display());

    let credentials = Credentials::load(&config);
    info!("  Participant id: {}", credentials.participant_id);

    let publisher = Arc::new(SuiCliPublisher::new(
        config.sui_bin.clone(),
        config.publish_timeout,
    ));
    let state = AppState::new(config, credentials, publisher)?;

    flag_gateway::run_server(state, &host, port).await
}
