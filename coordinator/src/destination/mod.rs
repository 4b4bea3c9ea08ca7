//! Submit proofs and execute approved payloads on destination ledgers.
//!
//! A destination ledger hosts two contracts the coordinator cares about:
//!
//! * a **gateway** that verifies proofs against its known verifier sets, marks every
//!   contained message approved (exactly once, under its [CommandId]) and later marks it
//!   consumed when the payload is executed;
//! * a **governance** contract that receives commands through the gateway and maintains
//!   time-locked (and operator-approved) proposals.
//!
//! Both are reached through the [Destination] adapter. [Submitter] resolves the adapter
//! and the chain's [Kind] from the [Registry](crate::registry::Registry), retries
//! transient failures and classifies the rest (see [Error::class]).

use crate::types::{Address, CommandId, CrossChainId, Value};
use bytes::Bytes;
use commonware_cryptography::sha256::Digest;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future};
use thiserror::Error;

mod submitter;
pub use submitter::Submitter;

/// Entry point variant a destination chain exposes for executing approved payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Keyed by [CommandId] (assigned sequentially by the gateway).
    Legacy,
    /// Keyed by `(source_chain, message_id)`.
    Amplifier,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Legacy => f.write_str("legacy"),
            Kind::Amplifier => f.write_str("amplifier"),
        }
    }
}

/// Event emitted by the gateway for every newly approved message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Approval {
    pub command_id: CommandId,
    pub cc_id: CrossChainId,
    pub source_address: String,
    pub destination_address: String,
    pub payload_hash: Digest,
}

/// What an execution acted on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    Message(CommandId),
    Proposal(Digest),
}

/// Proof of a successful execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub subject: Subject,
    /// Ledger time (unix seconds) of the execution.
    pub timestamp: u64,
}

/// Status of a governance proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalStatus {
    Scheduled,
    Approved,
    Executed,
    Cancelled,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Executed | ProposalStatus::Cancelled)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProposalStatus::Scheduled => "scheduled",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Executed => "executed",
            ProposalStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Reason the gateway rejected a proof.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    #[error("signed by an unknown verifier set")]
    UnknownSigners,
    #[error("signed by a verifier set outside the retention window")]
    StaleSigners,
    #[error("insufficient signer weight")]
    InsufficientWeight,
    #[error("malformed proof")]
    Malformed,
}

/// How the orchestrator should react to an [Error].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    /// Try the same call again later.
    Transient,
    /// Build a fresh proof and try again.
    Replay,
    /// The requested effect already happened.
    Done,
    /// Surface to the caller.
    Fatal,
}

/// Errors returned by a [Destination].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("destination unavailable: {0}")]
    Unavailable(String),
    #[error("proof rejected: {0}")]
    Rejected(Verification),
    #[error("message not approved")]
    NotApproved,
    #[error("already executed: {0}")]
    AlreadyExecuted(CommandId),
    #[error("payload does not match approval: {0}")]
    PayloadMismatch(CommandId),
    #[error("too early: eta={eta} now={now}")]
    TooEarly { eta: u64, now: u64 },
    #[error("proposal not found: {0}")]
    ProposalNotFound(Digest),
    #[error("proposal {hash} is {status}")]
    ProposalClosed { hash: Digest, status: ProposalStatus },
    #[error("proposal already executed: {0}")]
    ProposalExecuted(Digest),
    #[error("proposal already scheduled: {0}")]
    ProposalExists(Digest),
    #[error("proposal already operator-approved: {0}")]
    AlreadyApproved(Digest),
    #[error("proposal not operator-approved: {0}")]
    NotOperatorApproved(Digest),
    #[error("eta too soon: eta={eta} earliest={earliest}")]
    EtaTooSoon { eta: u64, earliest: u64 },
    #[error("unauthorized command source: {chain}:{address}")]
    Unauthorized { chain: String, address: String },
    #[error("malformed command: {0}")]
    Malformed(String),
    #[error("entry point not supported: {0}")]
    UnsupportedEntrypoint(Kind),
    #[error("unknown chain: {0}")]
    UnknownChain(String),
}

impl Error {
    pub fn class(&self) -> Class {
        match self {
            Error::Unavailable(_) | Error::NotApproved | Error::TooEarly { .. } => {
                Class::Transient
            }
            Error::Rejected(Verification::Malformed) => Class::Fatal,
            Error::Rejected(_) => Class::Replay,
            Error::AlreadyExecuted(_) | Error::ProposalExecuted(_) => Class::Done,
            _ => Class::Fatal,
        }
    }
}

/// Gateway, executable and governance surface of a destination ledger.
///
/// Governance operations are keyed by the `(target, call_data, native_value)` tuple the
/// proposal hash is computed from.
pub trait Destination: Clone + Send + Sync + 'static {
    /// Submit a completed proof, returning an [Approval] for every newly approved message.
    fn approve(
        &self,
        execute_data: Bytes,
    ) -> impl Future<Output = Result<Vec<Approval>, Error>> + Send;

    /// Approval (and whether it has been consumed) of `cc_id`, if any.
    fn approval(
        &self,
        cc_id: &CrossChainId,
    ) -> impl Future<Output = Result<Option<(Approval, bool)>, Error>> + Send;

    /// Execute an approved payload through the [Kind::Legacy] entry point.
    fn execute_legacy(
        &self,
        command_id: CommandId,
        source_chain: &str,
        source_address: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<Receipt, Error>> + Send;

    /// Execute an approved payload through the [Kind::Amplifier] entry point.
    fn execute_amplifier(
        &self,
        cc_id: &CrossChainId,
        source_address: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<Receipt, Error>> + Send;

    /// Eta of a scheduled proposal (if scheduled).
    fn eta(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> impl Future<Output = Result<Option<u64>, Error>> + Send;

    /// Status of the proposal (if it was ever scheduled or approved).
    fn proposal_status(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> impl Future<Output = Result<Option<ProposalStatus>, Error>> + Send;

    /// Returns true if the proposal may be executed through the operator path.
    fn is_operator_approved(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Execute a scheduled proposal once its eta has passed.
    fn execute_proposal(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> impl Future<Output = Result<Receipt, Error>> + Send;

    /// Execute an operator-approved proposal (no eta check).
    fn execute_operator_proposal(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> impl Future<Output = Result<Receipt, Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn digest() -> Digest {
        crate::types::payload_hash(b"x")
    }

    #[test_case(Error::Unavailable("rpc".into()), Class::Transient; "unavailable")]
    #[test_case(Error::NotApproved, Class::Transient; "not approved")]
    #[test_case(Error::TooEarly { eta: 2, now: 1 }, Class::Transient; "too early")]
    #[test_case(Error::Rejected(Verification::StaleSigners), Class::Replay; "stale")]
    #[test_case(Error::Rejected(Verification::UnknownSigners), Class::Replay; "unknown")]
    #[test_case(Error::Rejected(Verification::InsufficientWeight), Class::Replay; "weight")]
    #[test_case(Error::Rejected(Verification::Malformed), Class::Fatal; "malformed proof")]
    #[test_case(Error::ProposalExecuted(digest()), Class::Done; "proposal executed")]
    #[test_case(Error::ProposalNotFound(digest()), Class::Fatal; "not found")]
    #[test_case(Error::EtaTooSoon { eta: 1, earliest: 2 }, Class::Fatal; "eta too soon")]
    #[test_case(Error::UnknownChain("near".into()), Class::Fatal; "unknown chain")]
    fn test_class(err: Error, class: Class) {
        assert_eq!(err.class(), class);
    }

    #[test]
    fn test_already_executed_is_done() {
        let command_id = CommandId::from_sequence(0);
        assert_eq!(Error::AlreadyExecuted(command_id).class(), Class::Done);
        assert_eq!(Error::PayloadMismatch(command_id).class(), Class::Fatal);
    }

    #[test]
    fn test_kind_serde() {
        assert_eq!(serde_json::to_string(&Kind::Amplifier).unwrap(), "\"amplifier\"");
        assert_eq!(
            serde_json::from_str::<Kind>("\"legacy\"").unwrap(),
            Kind::Legacy
        );
    }
}
