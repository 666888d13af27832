//! Contract Publisher
//!
//! Publishes the challenge Move package with the Sui CLI and caches the
//! resulting package id for the lifetime of the process.
//!
//! Flow:
//! 1. Return the cached deployment if one exists
//! 2. Take the publish guard, re-check the cache
//! 3. Run `sui client publish --gas-budget <n> --json <dir>`
//! 4. Pull the publish digest and the `published` package id out of the output
//! 5. Store both in the deployment cache

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Identifiers recovered from a successful publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedContract {
    pub package_id: String,
    pub transaction_digest: String,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Move contract directory not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("publishing tool '{0}' not found")]
    ToolNotFound(String),
    #[error("failed to run publishing tool: {0}")]
    Spawn(String),
    #[error("publishing tool exited with {code:?}: {diagnostics}")]
    ToolFailed {
        code: Option<i32>,
        diagnostics: String,
    },
    #[error("publishing tool did not finish within {0:?}")]
    Timeout(Duration),
    #[error("failed to parse publishing tool output: {0}")]
    InvalidOutput(String),
    #[error("could not find package id or transaction digest in publishing tool output")]
    MissingIdentifiers,
}

impl PublishError {
    /// Operator-facing hint returned alongside the error message
    pub fn details(&self) -> String {
        match self {
            PublishError::SourceNotFound(_) => {
                "Make sure the contract sources are deployed on the server.".to_string()
            }
            PublishError::ToolNotFound(bin) => format!(
                "Install the Sui CLI and make sure '{}' is on PATH (try '{} client --version').",
                bin, bin
            ),
            PublishError::Spawn(_) => "Check the server logs for more information.".to_string(),
            PublishError::ToolFailed { diagnostics, .. } => diagnostics.clone(),
            PublishError::Timeout(_) => {
                "The publish command hung; check the Sui client configuration and network."
                    .to_string()
            }
            PublishError::InvalidOutput(_) | PublishError::MissingIdentifiers => {
                "Unexpected publish output; check the Sui CLI version.".to_string()
            }
        }
    }
}

/// Anything that can publish a Move package
#[async_trait]
pub trait ContractPublisher: Send + Sync {
    async fn publish(
        &self,
        source_dir: &Path,
        gas_budget: u64,
    ) -> Result<PublishedContract, PublishError>;
}

// ============================================================================
// SUI CLI PUBLISHER
// ============================================================================

/// Publishes by shelling out to the Sui CLI
pub struct SuiCliPublisher {
    binary: String,
    timeout: Duration,
}

impl SuiCliPublisher {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn args(source_dir: &Path, gas_budget: u64) -> Vec<String> {
        vec![
            "client".to_string(),
            "publish".to_string(),
            "--gas-budget".to_string(),
            gas_budget.to_string(),
            "--json".to_string(),
            source_dir.display().to_string(),
        ]
    }
}

#[async_trait]
impl ContractPublisher for SuiCliPublisher {
    async fn publish(
        &self,
        source_dir: &Path,
        gas_budget: u64,
    ) -> Result<PublishedContract, PublishError> {
        if !source_dir.is_dir() {
            error!("Move contract directory does not exist: {}", source_dir.display());
            return Err(PublishError::SourceNotFound(source_dir.to_path_buf()));
        }

        let args = Self::args(source_dir, gas_budget);
        info!("Running: {} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    error!("Publishing tool '{}' not found on PATH", self.binary);
                    PublishError::ToolNotFound(self.binary.clone())
                } else {
                    PublishError::Spawn(e.to_string())
                }
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                error!("Publishing tool timed out after {:?}", self.timeout);
                PublishError::Timeout(self.timeout)
            })?
            .map_err(|e| PublishError::Spawn(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            error!("Publishing tool failed with {:?}", output.status.code());
            error!("stdout: {}", stdout);
            error!("stderr: {}", stderr);
            let diagnostics = if stderr.trim().is_empty() {
                stdout
            } else {
                stderr
            };
            return Err(PublishError::ToolFailed {
                code: output.status.code(),
                diagnostics: diagnostics.trim().to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            warn!("Publishing tool wrote to stderr:\n{}", stderr);
        }

        parse_publish_output(&stdout).inspect_err(|e| error!("{}. Full output: {}", e, stdout))
    }
}

/// Extract the publish digest and the published package id from `--json` output
pub fn parse_publish_output(output: &str) -> Result<PublishedContract, PublishError> {
    let result: Value =
        serde_json::from_str(output).map_err(|e| PublishError::InvalidOutput(e.to_string()))?;

    let transaction_digest = result
        .get("effects")
        .and_then(|effects| effects.get("transactionDigest"))
        .and_then(Value::as_str);

    let package_id = result
        .get("objectChanges")
        .and_then(Value::as_array)
        .and_then(|changes| {
            changes
                .iter()
                .find(|change| change.get("type").and_then(Value::as_str) == Some("published"))
        })
        .and_then(|change| change.get("packageId"))
        .and_then(Value::as_str);

    match (package_id, transaction_digest) {
        (Some(package_id), Some(digest)) => Ok(PublishedContract {
            package_id: package_id.to_string(),
            transaction_digest: digest.to_string(),
        }),
        _ => Err(PublishError::MissingIdentifiers),
    }
}

// ============================================================================
// DEPLOYMENT STATE
// ============================================================================

/// Result of a start-challenge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Published during this call
    Published(PublishedContract),
    /// Served from the cache without running the tool
    AlreadyDeployed(PublishedContract),
}

impl DeployOutcome {
    pub fn contract(&self) -> &PublishedContract {
        match self {
            DeployOutcome::Published(c) | DeployOutcome::AlreadyDeployed(c) => c,
        }
    }
}

/// Process-wide deployment cache. Set at most once.
pub struct Deployment {
    publisher: Arc<dyn ContractPublisher>,
    source_dir: PathBuf,
    gas_budget: u64,
    current: RwLock<Option<PublishedContract>>,
    publish_guard: Mutex<()>,
}

impl Deployment {
    pub fn new(
        publisher: Arc<dyn ContractPublisher>,
        source_dir: PathBuf,
        gas_budget: u64,
    ) -> Self {
        Self {
            publisher,
            source_dir,
            gas_budget,
            current: RwLock::new(None),
            publish_guard: Mutex::new(()),
        }
    }

    /// Currently deployed contract, if any. Never blocks on a running publish.
    pub fn current(&self) -> Option<PublishedContract> {
        self.current.read().clone()
    }

    /// Publish once, or return the cached deployment
    pub async fn ensure_deployed(&self) -> Result<DeployOutcome, PublishError> {
        if let Some(contract) = self.current() {
            info!("Contract already deployed (package {})", contract.package_id);
            return Ok(DeployOutcome::AlreadyDeployed(contract));
        }

        let _guard = self.publish_guard.lock().await;

        // Another request may have published while we waited.
        if let Some(contract) = self.current() {
            info!("Contract already deployed (package {})", contract.package_id);
            return Ok(DeployOutcome::AlreadyDeployed(contract));
        }

        let contract = self
            .publisher
            .publish(&self.source_dir, self.gas_budget)
            .await?;

        info!(
            "Contract deployed. Package: {}, digest: {}",
            contract.package_id, contract.transaction_digest
        );
        *self.current.write() = Some(contract.clone());

        Ok(DeployOutcome::Published(contract))
    }
}
