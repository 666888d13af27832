//! Startup credential loading
//!
//! The reward token and the participant identifier are read once from flat
//! files. Loading never fails: a missing or unreadable file falls back to an
//! environment override and then to a placeholder so the page stays reachable.

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;

/// Where one credential comes from when its file is unusable
#[derive(Debug, Clone, Copy)]
pub struct CredentialSource {
    pub label: &'static str,
    pub env_var: &'static str,
    /// Used when the file does not exist and the env var is unset
    pub missing_placeholder: &'static str,
    /// Used when the file exists but cannot be read and the env var is unset
    pub error_placeholder: &'static str,
}

pub const REWARD_TOKEN: CredentialSource = CredentialSource {
    label: "reward token",
    env_var: "CTF_ROOT_FLAG",
    missing_placeholder: "flag{ENV_FLAG_NOT_SET}",
    error_placeholder: "flag{ERROR_READING_FLAG}",
};

pub const PARTICIPANT_ID: CredentialSource = CredentialSource {
    label: "participant id",
    env_var: "GITHUB_ID",
    missing_placeholder: "0x0_DEFAULT_GH_ID",
    error_placeholder: "error_reading_uuid",
};

/// Process-wide credentials, immutable after startup
#[derive(Clone)]
pub struct Credentials {
    pub reward_token: String,
    pub participant_id: String,
}

impl Credentials {
    pub fn new(reward_token: impl Into<String>, participant_id: impl Into<String>) -> Self {
        Self {
            reward_token: reward_token.into(),
            participant_id: participant_id.into(),
        }
    }

    /// Load both credentials from the configured paths
    pub fn load(config: &GatewayConfig) -> Self {
        info!("Loading credentials...");
        Self {
            reward_token: load_credential(&config.root_flag_path, &REWARD_TOKEN),
            participant_id: load_credential(&config.uuid_path, &PARTICIPANT_ID),
        }
    }
}

// The reward token must never reach the logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("reward_token", &"<redacted>")
            .field("participant_id", &self.participant_id)
            .finish()
    }
}

/// Read a single trimmed line of text, falling back per `source`
pub fn load_credential(path: &Path, source: &CredentialSource) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            info!("Loaded {} from {}", source.label, path.display());
            let value = contents.trim().to_string();
            if value.is_empty() {
                warn!("{} file {} is empty", source.label, path.display());
            }
            value
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(
                "{} file not found at {}, trying {}",
                source.label,
                path.display(),
                source.env_var
            );
            env_override(source).unwrap_or_else(|| source.missing_placeholder.to_string())
        }
        Err(e) => {
            error!(
                "Failed to read {} from {}: {}",
                source.label,
                path.display(),
                e
            );
            env_override(source).unwrap_or_else(|| source.error_placeholder.to_string())
        }
    }
}

fn env_override(source: &CredentialSource) -> Option<String> {
    match std::env::var(source.env_var) {
        Ok(value) => {
            info!("Using {} from {}", source.label, source.env_var);
            Some(value.trim().to_string())
        }
        Err(_) => {
            warn!(
                "{} not set, using placeholder {}",
                source.env_var, source.label
            );
            None
        }
    }
}
