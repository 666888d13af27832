//! Submission validation
//!
//! A submission passes when the transaction clears every chain check for the
//! current challenge mode AND the player's contract flag equals the secret.
//! Chain checks run in a fixed order and stop at the first rejection.

use serde_json::Value;
use thiserror::Error;

use crate::config::ChallengeMode;
use crate::ledger::{LedgerError, TransactionRecord};

/// Execution status reported for a successful transaction
pub const SUCCESS_STATUS: &str = "success";

/// Kind tag of a Move programmable transaction
pub const PROGRAMMABLE_KIND: &str = "ProgrammableTransaction";

/// Event payload field carrying the player's identity
pub const PARTICIPANT_FIELD: &str = "github_id";

/// Event payload field carrying the contract flag
pub const FLAG_FIELD: &str = "flag";

/// Why a transaction was rejected
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("the challenge contract has not been deployed yet; start the challenge first")]
    NotDeployed,
    #[error("could not fetch transaction details, check the digest and network connection ({0})")]
    Unverifiable(#[from] LedgerError),
    #[error("transaction did not succeed")]
    ExecutionFailed,
    #[error("not a valid programmable transaction")]
    NotProgrammable,
    #[error("transaction emitted no events; cannot verify identity")]
    NoEvents,
    #[error("event type mismatch: expected {expected}, got {actual}")]
    EventTypeMismatch { expected: String, actual: String },
    #[error("first event has no payload; cannot verify identity")]
    MissingPayload,
    #[error("participant id mismatch: expected {expected}, got {actual}")]
    ParticipantMismatch { expected: String, actual: String },
    #[error("first event payload carries no flag")]
    MissingFlag,
}

/// Inputs the chain checks compare against
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub participant_id: &'a str,
    /// Package the flag event must come from (contract mode)
    pub package_id: Option<&'a str>,
}

type CheckFn = fn(&TransactionRecord, &CheckContext<'_>) -> Result<(), Rejection>;

/// One named predicate over a transaction record
#[derive(Clone, Copy)]
pub struct Check {
    pub name: &'static str,
    run: CheckFn,
}

impl Check {
    pub fn run(&self, record: &TransactionRecord, ctx: &CheckContext<'_>) -> Result<(), Rejection> {
        (self.run)(record, ctx)
    }
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Check").field(&self.name).finish()
    }
}

pub const EXECUTION_STATUS: Check = Check {
    name: "execution-status",
    run: check_execution_status,
};
pub const PROGRAMMABLE_KIND_CHECK: Check = Check {
    name: "programmable-kind",
    run: check_programmable_kind,
};
pub const EVENTS_PRESENT: Check = Check {
    name: "events-present",
    run: check_events_present,
};
pub const EVENT_TYPE: Check = Check {
    name: "event-type",
    run: check_event_type,
};
pub const PARTICIPANT: Check = Check {
    name: "participant",
    run: check_participant,
};
pub const FLAG_PRESENT: Check = Check {
    name: "flag-present",
    run: check_flag_present,
};

const BASIC_CHECKS: &[Check] = &[EXECUTION_STATUS, EVENTS_PRESENT, PARTICIPANT];

const CONTRACT_CHECKS: &[Check] = &[
    EXECUTION_STATUS,
    PROGRAMMABLE_KIND_CHECK,
    EVENTS_PRESENT,
    EVENT_TYPE,
    PARTICIPANT,
    FLAG_PRESENT,
];

/// Ordered chain checks for a challenge mode
pub fn checks_for(mode: ChallengeMode) -> &'static [Check] {
    match mode {
        ChallengeMode::Basic => BASIC_CHECKS,
        ChallengeMode::Contract => CONTRACT_CHECKS,
    }
}

/// Run the mode's checks in order, stopping at the first rejection
pub fn validate_transaction(
    mode: ChallengeMode,
    record: &TransactionRecord,
    ctx: &CheckContext<'_>,
) -> Result<(), Rejection> {
    if mode.requires_contract() && ctx.package_id.is_none() {
        return Err(Rejection::NotDeployed);
    }
    for check in checks_for(mode) {
        check.run(record, ctx)?;
    }
    Ok(())
}

/// Contract flag comparison. Exact, case-sensitive.
pub fn flag_matches(submitted: &str, expected: &str) -> bool {
    submitted == expected
}

fn check_execution_status(
    record: &TransactionRecord,
    _: &CheckContext<'_>,
) -> Result<(), Rejection> {
    match record.execution_status() {
        Some(SUCCESS_STATUS) => Ok(()),
        _ => Err(Rejection::ExecutionFailed),
    }
}

fn check_programmable_kind(
    record: &TransactionRecord,
    _: &CheckContext<'_>,
) -> Result<(), Rejection> {
    match record.kind() {
        Some(PROGRAMMABLE_KIND) => Ok(()),
        _ => Err(Rejection::NotProgrammable),
    }
}

fn check_events_present(record: &TransactionRecord, _: &CheckContext<'_>) -> Result<(), Rejection> {
    match record.first_event() {
        Some(_) => Ok(()),
        None => Err(Rejection::NoEvents),
    }
}

fn check_event_type(record: &TransactionRecord, ctx: &CheckContext<'_>) -> Result<(), Rejection> {
    let package_id = ctx.package_id.ok_or(Rejection::NotDeployed)?;
    let expected = format!("{}::flag::FlagEvent", package_id);
    let actual = record
        .first_event()
        .ok_or(Rejection::NoEvents)?
        .event_type
        .as_ref();

    if actual.and_then(Value::as_str) == Some(expected.as_str()) {
        return Ok(());
    }
    Err(Rejection::EventTypeMismatch {
        expected,
        actual: match actual {
            None | Some(Value::Null) => "<missing>".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
        },
    })
}

fn payload(record: &TransactionRecord) -> Result<&serde_json::Map<String, Value>, Rejection> {
    record
        .first_event()
        .ok_or(Rejection::NoEvents)?
        .parsed_json
        .as_ref()
        .and_then(Value::as_object)
        .filter(|map| !map.is_empty())
        .ok_or(Rejection::MissingPayload)
}

fn check_participant(record: &TransactionRecord, ctx: &CheckContext<'_>) -> Result<(), Rejection> {
    match payload(record)?.get(PARTICIPANT_FIELD) {
        Some(Value::String(id)) if id == ctx.participant_id => Ok(()),
        other => Err(Rejection::ParticipantMismatch {
            expected: ctx.participant_id.to_string(),
            actual: match other {
                None | Some(Value::Null) => "<missing>".to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
            },
        }),
    }
}

// Presence only. The value is not compared against the configured flag.
fn check_flag_present(record: &TransactionRecord, _: &CheckContext<'_>) -> Result<(), Rejection> {
    match payload(record)?.get(FLAG_FIELD) {
        Some(v) if !v.is_null() => Ok(()),
        _ => Err(Rejection::MissingFlag),
    }
}

// ============================================================================
// VERDICT
// ============================================================================

/// Combined outcome of the chain checks and the contract flag comparison
#[derive(Debug)]
pub struct Verdict {
    pub chain: Result<(), Rejection>,
    pub flag_matches: bool,
}

impl Verdict {
    pub fn new(chain: Result<(), Rejection>, flag_matches: bool) -> Self {
        Self { chain, flag_matches }
    }

    /// True only when both halves pass
    pub fn passed(&self) -> bool {
        self.chain.is_ok() && self.flag_matches
    }

    /// Human-readable outcome naming which half failed
    pub fn message(&self) -> String {
        match (&self.chain, self.flag_matches) {
            (Ok(()), true) => "Congratulations! All checks passed.".to_string(),
            (Ok(()), false) => {
                "Transaction verified, but the submitted contract flag is incorrect.".to_string()
            }
            (Err(reason), true) => format!(
                "Contract flag accepted, but transaction verification failed: {}.",
                reason
            ),
            (Err(reason), false) => format!(
                "Transaction verification failed: {}. \
                 The submitted contract flag is also incorrect.",
                reason
            ),
        }
    }
}
