//! In-memory destination ledger hosting a gateway and a governance contract.
//!
//! The gateway verifies [Proof]s against the last `retention + 1` verifier sets it has
//! been rotated to, approves every contained message once and consumes it once. A
//! message addressed to the governance contract is applied as a [Command] atomically
//! with its consumption: if the command fails, the message stays approved but
//! unconsumed. Every other payload is recorded as an [Effect].

use super::proof::{Proof, VerifierSet};
use crate::{
    destination::{
        Approval, Destination, Error, Kind, ProposalStatus, Receipt, Subject, Verification,
    },
    proposal::{self, Command},
    registry::{Authority, Chain},
    types::{payload_hash, unix, Address, CommandId, CrossChainId, Value},
};
use bytes::Bytes;
use commonware_codec::DecodeExt;
use commonware_cryptography::sha256::Digest;
use commonware_runtime::Clock;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};
use tracing::debug;

/// Side effect observed on the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// A generic payload was delivered to `destination_address`.
    Delivered {
        command_id: CommandId,
        destination_address: String,
        payload: Bytes,
    },
    /// A governance proposal called `target`.
    Called {
        target: Address,
        call_data: Bytes,
        native_value: Value,
    },
}

/// Configuration for the mock [Ledger].
#[derive(Clone, Debug)]
pub struct Config {
    /// Name of the chain the ledger hosts.
    pub chain: String,

    /// Entry point the ledger exposes.
    pub kind: Kind,

    /// Address of the governance contract.
    pub governance: String,

    /// Source the governance contract accepts commands from.
    pub authority: Authority,

    /// Minimum delay (seconds) between now and the eta of a scheduled proposal.
    pub minimum_eta_delay: u64,

    /// Whether operator commands are accepted.
    pub operator_commands: bool,

    /// Initial verifier set.
    pub verifiers: VerifierSet,

    /// Number of previous verifier sets still accepted after a rotation.
    pub retention: usize,
}

impl Config {
    /// Derive a ledger configuration from a registry entry.
    pub fn from_chain(
        name: impl Into<String>,
        chain: &Chain,
        verifiers: VerifierSet,
        retention: usize,
    ) -> Self {
        Self {
            chain: name.into(),
            kind: chain.kind,
            governance: chain.governance.clone(),
            authority: chain.authority.clone(),
            minimum_eta_delay: chain.minimum_eta_delay,
            operator_commands: chain.operator_commands,
            verifiers,
            retention,
        }
    }
}

struct Record {
    approval: Approval,
    consumed: bool,
}

struct Proposal {
    eta: Option<u64>,
    operator_approved: bool,
    status: ProposalStatus,
}

impl Proposal {
    fn refresh(&mut self) {
        self.status = if self.operator_approved {
            ProposalStatus::Approved
        } else if self.eta.is_some() {
            ProposalStatus::Scheduled
        } else {
            ProposalStatus::Cancelled
        };
    }
}

struct State {
    cfg: Config,
    sets: VecDeque<VerifierSet>,
    approvals: BTreeMap<CommandId, Record>,
    commands: BTreeMap<CrossChainId, CommandId>,
    sequence: u64,
    proposals: BTreeMap<Digest, Proposal>,
    effects: Vec<Effect>,
    failures: usize,
    requests: BTreeMap<&'static str, usize>,
    lag: u64,
}

impl State {
    /// Count a request to `method`, failing it if failures are pending.
    fn request(&mut self, method: &'static str) -> Result<(), Error> {
        *self.requests.entry(method).or_default() += 1;
        if self.failures > 0 {
            self.failures -= 1;
            return Err(Error::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn verify(&self, proof: &Proof) -> Result<(), Verification> {
        let (Some(oldest), Some(latest)) = (self.sets.front(), self.sets.back()) else {
            return Err(Verification::UnknownSigners);
        };
        if proof.epoch < oldest.epoch {
            return Err(Verification::StaleSigners);
        }
        if proof.epoch > latest.epoch {
            return Err(Verification::UnknownSigners);
        }
        let set = self
            .sets
            .iter()
            .find(|set| set.epoch == proof.epoch)
            .ok_or(Verification::UnknownSigners)?;
        let weight = set
            .weight(&proof.signers)
            .ok_or(Verification::UnknownSigners)?;
        if weight < set.threshold {
            return Err(Verification::InsufficientWeight);
        }
        Ok(())
    }

    fn record(
        &self,
        command_id: CommandId,
        source_chain: &str,
        source_address: &str,
    ) -> Result<&Record, Error> {
        let record = self.approvals.get(&command_id).ok_or(Error::NotApproved)?;
        if record.approval.cc_id.chain != source_chain
            || record.approval.source_address != source_address
        {
            return Err(Error::NotApproved);
        }
        Ok(record)
    }

    /// Run the payload of an approved message and mark it consumed.
    fn consume(
        &mut self,
        command_id: CommandId,
        payload: Bytes,
        now: u64,
    ) -> Result<Receipt, Error> {
        let record = self.approvals.get(&command_id).ok_or(Error::NotApproved)?;
        if record.consumed {
            return Err(Error::AlreadyExecuted(command_id));
        }
        if payload_hash(&payload) != record.approval.payload_hash {
            return Err(Error::PayloadMismatch(command_id));
        }
        let approval = record.approval.clone();
        if approval.destination_address == self.cfg.governance {
            self.govern(&approval, &payload, now)?;
        } else {
            self.effects.push(Effect::Delivered {
                command_id,
                destination_address: approval.destination_address.clone(),
                payload,
            });
        }
        if let Some(record) = self.approvals.get_mut(&command_id) {
            record.consumed = true;
        }
        Ok(Receipt {
            subject: Subject::Message(command_id),
            timestamp: now,
        })
    }

    /// Apply a governance command relayed through the gateway.
    fn govern(&mut self, approval: &Approval, payload: &[u8], now: u64) -> Result<(), Error> {
        let authority = &self.cfg.authority;
        if approval.cc_id.chain != authority.chain || approval.source_address != authority.address {
            return Err(Error::Unauthorized {
                chain: approval.cc_id.chain.clone(),
                address: approval.source_address.clone(),
            });
        }
        let command =
            Command::from_payload(payload).map_err(|err| Error::Malformed(err.to_string()))?;
        if command.kind.is_operator() && !self.cfg.operator_commands {
            return Err(Error::Malformed(
                proposal::Error::InvalidCommandKind(command.kind as u8).to_string(),
            ));
        }
        let hash = command.proposal_hash();
        let closed = self.proposals.get(&hash).map(|proposal| proposal.status);
        let live = self
            .proposals
            .get_mut(&hash)
            .filter(|proposal| !proposal.status.is_terminal());
        match command.kind {
            proposal::Kind::ScheduleTimelock => {
                let earliest = now + self.cfg.minimum_eta_delay;
                if command.eta < earliest {
                    return Err(Error::EtaTooSoon {
                        eta: command.eta,
                        earliest,
                    });
                }
                match live {
                    Some(proposal) if proposal.eta.is_some() => {
                        return Err(Error::ProposalExists(hash))
                    }
                    Some(proposal) => {
                        proposal.eta = Some(command.eta);
                        proposal.refresh();
                    }
                    None => {
                        self.proposals.insert(
                            hash,
                            Proposal {
                                eta: Some(command.eta),
                                operator_approved: false,
                                status: ProposalStatus::Scheduled,
                            },
                        );
                    }
                }
            }
            proposal::Kind::ApproveOperator => match live {
                Some(proposal) if proposal.operator_approved => {
                    return Err(Error::AlreadyApproved(hash))
                }
                Some(proposal) => {
                    proposal.operator_approved = true;
                    proposal.refresh();
                }
                None => {
                    self.proposals.insert(
                        hash,
                        Proposal {
                            eta: None,
                            operator_approved: true,
                            status: ProposalStatus::Approved,
                        },
                    );
                }
            },
            proposal::Kind::CancelTimelock => {
                let proposal = Self::open(live, closed, hash)?;
                if proposal.eta.take().is_none() {
                    return Err(Error::ProposalNotFound(hash));
                }
                proposal.refresh();
            }
            proposal::Kind::CancelOperatorApproval => {
                let proposal = Self::open(live, closed, hash)?;
                if !proposal.operator_approved {
                    return Err(Error::NotOperatorApproved(hash));
                }
                proposal.operator_approved = false;
                proposal.refresh();
            }
        }
        debug!(kind = %command.kind, %hash, "governance command applied");
        Ok(())
    }

    /// Resolve the live proposal a cancel command refers to.
    fn open(
        live: Option<&mut Proposal>,
        closed: Option<ProposalStatus>,
        hash: Digest,
    ) -> Result<&mut Proposal, Error> {
        live.ok_or(match closed {
            Some(status) => Error::ProposalClosed { hash, status },
            None => Error::ProposalNotFound(hash),
        })
    }

    /// Resolve a proposal that may still be executed.
    fn executable(&mut self, hash: Digest) -> Result<&mut Proposal, Error> {
        let proposal = self
            .proposals
            .get_mut(&hash)
            .ok_or(Error::ProposalNotFound(hash))?;
        match proposal.status {
            ProposalStatus::Executed => Err(Error::ProposalExecuted(hash)),
            ProposalStatus::Cancelled => Err(Error::ProposalClosed {
                hash,
                status: ProposalStatus::Cancelled,
            }),
            _ => Ok(proposal),
        }
    }
}

/// In-memory destination ledger.
#[derive(Clone)]
pub struct Ledger<E: Clock> {
    context: E,
    state: Arc<Mutex<State>>,
}

impl<E: Clock> Ledger<E> {
    pub fn new(context: E, cfg: Config) -> Self {
        let mut sets = VecDeque::new();
        sets.push_back(cfg.verifiers.clone());
        let state = State {
            cfg,
            sets,
            approvals: BTreeMap::new(),
            commands: BTreeMap::new(),
            sequence: 0,
            proposals: BTreeMap::new(),
            effects: Vec::new(),
            failures: 0,
            requests: BTreeMap::new(),
            lag: 0,
        };
        Self {
            context,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn now(&self) -> u64 {
        let lag = self.state.lock().unwrap().lag;
        unix(self.context.current()).saturating_sub(lag)
    }

    /// Rotate the gateway to `verifiers`, forgetting sets older than the retention window.
    pub fn rotate(&self, verifiers: VerifierSet) {
        let mut state = self.state.lock().unwrap();
        state.sets.push_back(verifiers);
        while state.sets.len() > state.cfg.retention + 1 {
            state.sets.pop_front();
        }
    }

    /// Fail the next `n` requests with [Error::Unavailable].
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().failures = n;
    }

    /// Number of requests made to `method` so far.
    pub fn requests(&self, method: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.requests.get(method).copied().unwrap_or_default()
    }

    /// Run the ledger clock `lag` seconds behind the runtime clock.
    pub fn set_lag(&self, lag: u64) {
        self.state.lock().unwrap().lag = lag;
    }

    /// Side effects observed so far.
    pub fn effects(&self) -> Vec<Effect> {
        self.state.lock().unwrap().effects.clone()
    }

    /// Status of the proposal `(target, call_data, native_value)`.
    pub fn status(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> Option<ProposalStatus> {
        let hash = proposal::hash(target, call_data, native_value);
        let state = self.state.lock().unwrap();
        state.proposals.get(&hash).map(|proposal| proposal.status)
    }
}

impl<E: Clock> Destination for Ledger<E> {
    async fn approve(&self, execute_data: Bytes) -> Result<Vec<Approval>, Error> {
        let mut state = self.state.lock().unwrap();
        state.request("approve")?;
        let proof = Proof::decode(execute_data)
            .map_err(|_| Error::Rejected(Verification::Malformed))?;
        state.verify(&proof).map_err(Error::Rejected)?;
        if proof
            .messages
            .iter()
            .any(|message| message.destination_chain != state.cfg.chain)
        {
            return Err(Error::Rejected(Verification::Malformed));
        }

        let kind = state.cfg.kind;
        let mut approvals = Vec::new();
        for message in proof.messages {
            if state.commands.contains_key(&message.cc_id) {
                continue;
            }
            let command_id = match kind {
                Kind::Amplifier => CommandId::from_cc_id(&message.cc_id),
                Kind::Legacy => {
                    let command_id = CommandId::from_sequence(state.sequence);
                    state.sequence += 1;
                    command_id
                }
            };
            if state.approvals.contains_key(&command_id) {
                continue;
            }
            let approval = Approval {
                command_id,
                cc_id: message.cc_id.clone(),
                source_address: message.source_address,
                destination_address: message.destination_address,
                payload_hash: message.payload_hash,
            };
            state.commands.insert(message.cc_id, command_id);
            state.approvals.insert(
                command_id,
                Record {
                    approval: approval.clone(),
                    consumed: false,
                },
            );
            approvals.push(approval);
        }
        Ok(approvals)
    }

    async fn approval(&self, cc_id: &CrossChainId) -> Result<Option<(Approval, bool)>, Error> {
        let mut state = self.state.lock().unwrap();
        state.request("approval")?;
        let status = state
            .commands
            .get(cc_id)
            .and_then(|command_id| state.approvals.get(command_id))
            .map(|record| (record.approval.clone(), record.consumed));
        Ok(status)
    }

    async fn execute_legacy(
        &self,
        command_id: CommandId,
        source_chain: &str,
        source_address: &str,
        payload: Bytes,
    ) -> Result<Receipt, Error> {
        let now = self.now();
        let mut state = self.state.lock().unwrap();
        state.request("execute_legacy")?;
        if state.cfg.kind != Kind::Legacy {
            return Err(Error::UnsupportedEntrypoint(Kind::Legacy));
        }
        state.record(command_id, source_chain, source_address)?;
        state.consume(command_id, payload, now)
    }

    async fn execute_amplifier(
        &self,
        cc_id: &CrossChainId,
        source_address: &str,
        payload: Bytes,
    ) -> Result<Receipt, Error> {
        let now = self.now();
        let mut state = self.state.lock().unwrap();
        state.request("execute_amplifier")?;
        if state.cfg.kind != Kind::Amplifier {
            return Err(Error::UnsupportedEntrypoint(Kind::Amplifier));
        }
        let command_id = *state.commands.get(cc_id).ok_or(Error::NotApproved)?;
        state.record(command_id, &cc_id.chain, source_address)?;
        state.consume(command_id, payload, now)
    }

    async fn eta(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> Result<Option<u64>, Error> {
        let hash = proposal::hash(target, call_data, native_value);
        let mut state = self.state.lock().unwrap();
        state.request("eta")?;
        Ok(state
            .proposals
            .get(&hash)
            .filter(|proposal| !proposal.status.is_terminal())
            .and_then(|proposal| proposal.eta))
    }

    async fn proposal_status(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> Result<Option<ProposalStatus>, Error> {
        let hash = proposal::hash(target, call_data, native_value);
        let mut state = self.state.lock().unwrap();
        state.request("proposal_status")?;
        Ok(state.proposals.get(&hash).map(|proposal| proposal.status))
    }

    async fn is_operator_approved(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> Result<bool, Error> {
        let hash = proposal::hash(target, call_data, native_value);
        let mut state = self.state.lock().unwrap();
        state.request("is_operator_approved")?;
        Ok(state
            .proposals
            .get(&hash)
            .is_some_and(|proposal| {
                !proposal.status.is_terminal() && proposal.operator_approved
            }))
    }

    async fn execute_proposal(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> Result<Receipt, Error> {
        let now = self.now();
        let hash = proposal::hash(target, call_data, native_value);
        let mut state = self.state.lock().unwrap();
        state.request("execute_proposal")?;
        let proposal = state.executable(hash)?;
        let Some(eta) = proposal.eta else {
            return Err(Error::ProposalNotFound(hash));
        };
        if now < eta {
            return Err(Error::TooEarly { eta, now });
        }
        proposal.status = ProposalStatus::Executed;
        state.effects.push(Effect::Called {
            target: target.clone(),
            call_data: Bytes::copy_from_slice(call_data),
            native_value: *native_value,
        });
        Ok(Receipt {
            subject: Subject::Proposal(hash),
            timestamp: now,
        })
    }

    async fn execute_operator_proposal(
        &self,
        target: &Address,
        call_data: &[u8],
        native_value: &Value,
    ) -> Result<Receipt, Error> {
        let now = self.now();
        let hash = proposal::hash(target, call_data, native_value);
        let mut state = self.state.lock().unwrap();
        state.request("execute_operator_proposal")?;
        let proposal = state.executable(hash)?;
        if !proposal.operator_approved {
            return Err(Error::NotOperatorApproved(hash));
        }
        proposal.status = ProposalStatus::Executed;
        state.effects.push(Effect::Called {
            target: target.clone(),
            call_data: Bytes::copy_from_slice(call_data),
            native_value: *native_value,
        });
        Ok(Receipt {
            subject: Subject::Proposal(hash),
            timestamp: now,
        })
    }
}
