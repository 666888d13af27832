//! Ledger Query Client
//!
//! Fetches full transaction details from a Sui full node over JSON-RPC.
//! One attempt per call; every failure is reported as a typed `LedgerError`
//! so the caller can render "cannot validate" without crashing.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

/// JSON-RPC method returning a transaction block with effects and events
pub const GET_TRANSACTION_METHOD: &str = "sui_getTransactionBlock";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("RPC request timed out")]
    Timeout,
    #[error("RPC transport error: {0}")]
    Transport(String),
    #[error("RPC endpoint returned HTTP {0}")]
    Status(u16),
    #[error("Failed to decode RPC response: {0}")]
    Decode(String),
    #[error("RPC error: {0}")]
    Rpc(Value),
    #[error("RPC response has no result")]
    MissingResult,
}

/// Which sections the node must include in the transaction response
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOptions {
    pub show_input: bool,
    pub show_raw_input: bool,
    pub show_effects: bool,
    pub show_events: bool,
    pub show_object_changes: bool,
    pub show_balance_changes: bool,
}

impl TransactionOptions {
    pub fn full() -> Self {
        Self {
            show_input: true,
            show_raw_input: true,
            show_effects: true,
            show_events: true,
            show_object_changes: true,
            show_balance_changes: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (&'a str, TransactionOptions),
}

// ============================================================================
// TRANSACTION RECORD
// ============================================================================

/// Transaction block as returned by the node. Every field is optional and the
/// compared tags are kept as raw JSON, so a sparse or oddly typed response
/// becomes a validation failure instead of a decode error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub transaction: Option<TransactionEnvelope>,
    #[serde(default)]
    pub effects: Option<TransactionEffects>,
    #[serde(default)]
    pub events: Option<Vec<TransactionEvent>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionEnvelope {
    #[serde(default)]
    pub data: Option<TransactionData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionData {
    #[serde(default)]
    pub transaction: Option<TransactionKind>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionKind {
    #[serde(default)]
    pub kind: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionEffects {
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    #[serde(default, rename = "type")]
    pub event_type: Option<Value>,
    #[serde(default)]
    pub parsed_json: Option<Value>,
}

impl TransactionRecord {
    /// Execution status string (`success` / `failure`)
    pub fn execution_status(&self) -> Option<&str> {
        self.effects
            .as_ref()?
            .status
            .as_ref()?
            .status
            .as_ref()?
            .as_str()
    }

    /// Transaction kind tag, e.g. `ProgrammableTransaction`
    pub fn kind(&self) -> Option<&str> {
        self.transaction
            .as_ref()?
            .data
            .as_ref()?
            .transaction
            .as_ref()?
            .kind
            .as_ref()?
            .as_str()
    }

    pub fn first_event(&self) -> Option<&TransactionEvent> {
        self.events.as_ref()?.first()
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Sui JSON-RPC client
#[derive(Clone)]
pub struct LedgerClient {
    client: Client,
    endpoint: String,
}

impl LedgerClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Fetch a transaction block with status, events, input and changes
    pub async fn get_transaction(&self, digest: &str) -> Result<TransactionRecord, LedgerError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: GET_TRANSACTION_METHOD,
            params: (digest, TransactionOptions::full()),
        };

        debug!("{} {} via {}", GET_TRANSACTION_METHOD, digest, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!(
                        "RPC timeout: {} for {} (endpoint {})",
                        GET_TRANSACTION_METHOD, digest, self.endpoint
                    );
                    LedgerError::Timeout
                } else {
                    error!("RPC request failed for {}: {}", digest, e);
                    LedgerError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("RPC endpoint returned {} for {}", status, digest);
            return Err(LedgerError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                LedgerError::Timeout
            } else {
                LedgerError::Transport(e.to_string())
            }
        })?;

        parse_response(&body).inspect_err(|e| error!("RPC response for {}: {}", digest, e))
    }
}

/// Decode a JSON-RPC envelope into a transaction record
pub fn parse_response(body: &str) -> Result<TransactionRecord, LedgerError> {
    let mut envelope: serde_json::Map<String, Value> =
        serde_json::from_str(body).map_err(|e| LedgerError::Decode(e.to_string()))?;

    // Any `error` key fails the call, even `"error": null`.
    if let Some(err) = envelope.remove("error") {
        return Err(LedgerError::Rpc(err));
    }

    match envelope.remove("result") {
        None | Some(Value::Null) => Err(LedgerError::MissingResult),
        Some(result) => {
            serde_json::from_value(result).map_err(|e| LedgerError::Decode(e.to_string()))
        }
    }
}
