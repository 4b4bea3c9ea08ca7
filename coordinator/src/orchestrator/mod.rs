//! Drive governance commands (and arbitrary payloads) from the hub to execution.
//!
//! # Pipeline
//!
//! Every governance proposal moves through the same stages:
//!
//! ```txt
//! Building → Delivered → ProofPending → ProofReady → Approved → Executed
//!     \__________\______________\____________\___________\______→ Cancelled
//! ```
//!
//! 1. **Building**: the [Command] is validated against the destination's command set.
//! 2. **Delivered**: the hub routed the encoded command to the destination's governance
//!    contract; the message now has a cc-id.
//! 3. **ProofPending**: a proof-construction session is open on the hub. An expired
//!    session is replaced by a fresh one (bounded by the approval wait).
//! 4. **ProofReady**: the session completed with an `execute_data` blob.
//! 5. **Approved**: the destination gateway accepted the proof. A proof rejected because
//!    of a rotated verifier set is never resubmitted: a fresh session is requested
//!    instead (up to [Config::max_proof_attempts] times).
//! 6. **Executed**: the approved payload was executed (applying the command on the
//!    governance contract) and, for timelock proposals once the eta has passed (or for
//!    operator proposals once approval is observed), the proposal itself was executed.
//!
//! Cancel commands end in **Cancelled** once executed on the destination, as does the
//! proposal they cancel.
//!
//! # State
//!
//! The orchestrator keeps no state of its own: each pipeline's progress lives in the
//! caller-owned [Proposal] (or [Delivery]) and stages only move forward. Any number of
//! pipelines may run concurrently on clones of the same [Orchestrator]. Dropping a
//! pipeline's future abandons it without side effects and [Orchestrator::resume] picks
//! it up again from hub and destination state alone.

use crate::{
    backoff::Policy,
    destination::{self, Approval, Receipt},
    proposal::{self, Command},
    relay,
    session::Tracker,
    types::{CrossChainId, CrossChainMessage},
};
use commonware_cryptography::sha256::Digest;
use std::{fmt, time::Duration};
use thiserror::Error;

mod engine;
pub use engine::Orchestrator;
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
mod tests;

/// Configuration for the [Orchestrator].
#[derive(Clone, Debug)]
pub struct Config {
    /// Chain commands originate from.
    pub source_chain: String,

    /// Address (on `source_chain`) commands originate from.
    pub source_address: String,

    /// Backoff while waiting for a proof session to complete.
    pub approval: Policy,

    /// Backoff while waiting for a payload or proposal to become executable.
    pub execution: Policy,

    /// Backoff for transient RPC failures.
    pub rpc: Policy,

    /// Maximum number of proofs built for one message before giving up.
    pub max_proof_attempts: usize,
}

impl Config {
    /// Default policies for the given source identity.
    pub fn new(source_chain: impl Into<String>, source_address: impl Into<String>) -> Self {
        Self {
            source_chain: source_chain.into(),
            source_address: source_address.into(),
            approval: Policy::bounded(Duration::from_secs(10 * 60)),
            execution: Policy::bounded(Duration::from_secs(10 * 60)),
            rpc: Policy::bounded(Duration::from_secs(60)),
            max_proof_attempts: 3,
        }
    }
}

/// Progress of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Building,
    Delivered,
    ProofPending,
    ProofReady,
    Approved,
    Executed,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Executed | Stage::Cancelled)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Delivery of one payload through the hub to a destination contract.
#[derive(Debug)]
pub struct Delivery {
    message: CrossChainMessage,
    stage: Stage,
    approval: Option<Approval>,
    consumed: bool,
    receipt: Option<Receipt>,
    tracker: Tracker,
}

impl Delivery {
    fn new(message: CrossChainMessage) -> Self {
        Self {
            message,
            stage: Stage::Delivered,
            approval: None,
            consumed: false,
            receipt: None,
            tracker: Tracker::new(),
        }
    }

    /// Move to `next` if it is ahead of the current stage.
    ///
    /// Terminal stages never change. [Stage::Cancelled] may be entered from any
    /// non-terminal stage.
    fn advance(&mut self, next: Stage) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        if next == Stage::Cancelled || next > self.stage {
            self.stage = next;
            return true;
        }
        false
    }

    pub fn message(&self) -> &CrossChainMessage {
        &self.message
    }

    pub fn cc_id(&self) -> &CrossChainId {
        self.message.cc_id()
    }

    pub fn destination_chain(&self) -> &str {
        &self.message.message.destination_chain
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Gateway approval of the message (once [Stage::Approved]).
    pub fn approval(&self) -> Option<&Approval> {
        self.approval.as_ref()
    }

    /// Receipt of the payload execution, if this pipeline performed it.
    pub fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }

    /// Returns true once the payload has been executed on the destination (by anyone).
    pub fn consumed(&self) -> bool {
        self.consumed
    }

    /// Sessions observed and replays performed while proving this delivery.
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }
}

/// A governance command and the delivery carrying it.
#[derive(Debug)]
pub struct Proposal {
    command: Command,
    hash: Digest,
    delivery: Delivery,
    receipt: Option<Receipt>,
}

impl Proposal {
    fn new(command: Command, message: CrossChainMessage) -> Self {
        Self {
            hash: command.proposal_hash(),
            command,
            delivery: Delivery::new(message),
            receipt: None,
        }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn hash(&self) -> Digest {
        self.hash
    }

    pub fn cc_id(&self) -> &CrossChainId {
        self.delivery.cc_id()
    }

    pub fn destination_chain(&self) -> &str {
        self.delivery.destination_chain()
    }

    pub fn stage(&self) -> Stage {
        self.delivery.stage
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Receipt of the proposal execution, if this pipeline performed it.
    pub fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }
}

/// Identity an [Error] refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Id {
    /// A routed message.
    Message(CrossChainId),
    /// A governance proposal.
    Proposal(Digest),
    /// A payload not yet routed (by hash).
    Payload(Digest),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Message(cc_id) => write!(f, "message {cc_id}"),
            Id::Proposal(hash) => write!(f, "proposal {hash}"),
            Id::Payload(hash) => write!(f, "payload {hash}"),
        }
    }
}

/// Errors that terminate a pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{id}: invalid command: {source}")]
    Invalid { id: Id, source: proposal::Error },
    #[error("{id}: hub: {source}")]
    Relay { id: Id, source: relay::Error },
    #[error("{id}: destination: {source}")]
    Destination { id: Id, source: destination::Error },
    #[error("{cc_id}: no proof after {waited:?}")]
    ApprovalTimeout { cc_id: CrossChainId, waited: Duration },
    #[error("{id}: not executable after {waited:?}")]
    ExecutionTimeout { id: Id, waited: Duration },
    #[error("{cc_id}: proof rejected {attempts} times")]
    ProofAttemptsExhausted { cc_id: CrossChainId, attempts: usize },
    #[error("{0}: gateway accepted proof without approving the message")]
    MissingApproval(CrossChainId),
    #[error("{0}: routed payload does not match the command")]
    PayloadMismatch(CrossChainId),
}

impl Error {
    /// The identity the error refers to.
    pub fn id(&self) -> Id {
        match self {
            Error::Invalid { id, .. }
            | Error::Relay { id, .. }
            | Error::Destination { id, .. }
            | Error::ExecutionTimeout { id, .. } => id.clone(),
            Error::ApprovalTimeout { cc_id, .. }
            | Error::ProofAttemptsExhausted { cc_id, .. }
            | Error::MissingApproval(cc_id)
            | Error::PayloadMismatch(cc_id) => Id::Message(cc_id.clone()),
        }
    }
}
