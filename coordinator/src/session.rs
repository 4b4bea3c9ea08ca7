//! Threshold-signing sessions.
//!
//! A [Session] is created by a proof-construction request and collects signer weight
//! until it reaches the threshold of the active verifier set (yielding an opaque
//! `execute_data` blob) or times out. Terminal states never change.
//!
//! The coordinator only ever observes sessions by polling. [Tracker] enforces that the
//! sequence of observed statuses for one session is `Pending*` followed by at most one
//! terminal status, no matter how inconsistent the hub's answers are.

use crate::types::CrossChainId;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Identifier of a proof-construction session on the hub.
pub type Id = u64;

/// Observable state of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Pending,
    Completed { execute_data: Bytes },
    Expired,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending)
    }
}

/// A single threshold-signing session.
#[derive(Clone, Debug)]
pub struct Session {
    id: Id,
    cc_ids: Vec<CrossChainId>,
    required: u64,
    collected: u64,
    signers: BTreeMap<String, u64>,
    status: Status,
}

impl Session {
    /// Create a pending session over `cc_ids` (sorted and de-duplicated).
    pub fn new(id: Id, cc_ids: impl IntoIterator<Item = CrossChainId>, required: u64) -> Self {
        let cc_ids: BTreeSet<_> = cc_ids.into_iter().collect();
        Self {
            id,
            cc_ids: cc_ids.into_iter().collect(),
            required,
            collected: 0,
            signers: BTreeMap::new(),
            status: Status::Pending,
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn cc_ids(&self) -> &[CrossChainId] {
        &self.cc_ids
    }

    pub fn required(&self) -> u64 {
        self.required
    }

    pub fn collected(&self) -> u64 {
        self.collected
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Signers (and their weights) that have contributed so far.
    pub fn signers(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.signers.iter()
    }

    /// Returns true if collected weight has reached the threshold.
    pub fn reached(&self) -> bool {
        self.collected >= self.required
    }

    /// Record a signature from `signer`.
    ///
    /// Returns false (and changes nothing) if the signer already contributed or the
    /// session is no longer pending.
    pub fn sign(&mut self, signer: &str, weight: u64) -> bool {
        if self.status.is_terminal() || self.signers.contains_key(signer) {
            return false;
        }
        self.signers.insert(signer.to_string(), weight);
        self.collected = self.collected.saturating_add(weight);
        true
    }

    /// Mark the session completed with its encoded proof.
    ///
    /// Only succeeds if the session is pending and has reached its threshold.
    pub fn complete(&mut self, execute_data: Bytes) -> bool {
        if self.status.is_terminal() || !self.reached() {
            return false;
        }
        self.status = Status::Completed { execute_data };
        true
    }

    /// Mark a pending session expired.
    pub fn expire(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = Status::Expired;
        true
    }
}

/// Client-side view of the sessions a pipeline has polled.
#[derive(Default, Debug)]
pub struct Tracker {
    observed: BTreeMap<Id, Status>,
    replays: usize,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a polled status and return the status the caller should act on.
    ///
    /// Once a terminal status has been observed for a session, it is returned for every
    /// later observation: a hub answering `Pending` (or a different terminal status)
    /// afterwards is ignored.
    pub fn observe(&mut self, session: Id, status: Status) -> Status {
        match self.observed.get(&session) {
            Some(previous) if previous.is_terminal() => {
                if *previous != status {
                    warn!(session, ?previous, ?status, "ignoring session regression");
                }
                previous.clone()
            }
            _ => {
                if status.is_terminal() {
                    debug!(session, "session resolved");
                }
                self.observed.insert(session, status.clone());
                status
            }
        }
    }

    /// Record that the pipeline abandoned its current session for a fresh one.
    pub fn replay(&mut self) {
        self.replays += 1;
    }

    /// Number of sessions observed.
    pub fn sessions(&self) -> usize {
        self.observed.len()
    }

    /// Number of times a session was replaced by a fresh one.
    pub fn replays(&self) -> usize {
        self.replays
    }

    pub fn last(&self, session: Id) -> Option<&Status> {
        self.observed.get(&session)
    }
}
