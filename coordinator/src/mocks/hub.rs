//! In-memory hub that routes messages and runs threshold-signing sessions.
//!
//! Verifiers are simulated: each member of the active [VerifierSet] either signs a
//! fixed delay after a session is created or never signs at all ([Behavior]). Sessions
//! are evaluated lazily whenever they are queried, using the runtime clock, so tests
//! driven by the deterministic runtime observe exact, reproducible timings.

use super::proof::{Proof, VerifierSet};
use crate::{
    relay::{Error, Hub as HubTrait},
    session::{self, Session, Status},
    types::{payload_hash, CrossChainId, CrossChainMessage, Message},
};
use bytes::Bytes;
use commonware_codec::Encode;
use commonware_runtime::Clock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tracing::debug;

/// How a verifier reacts to a new session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    /// Sign the given delay after the session is created.
    Sign(Duration),
    /// Never sign.
    Silent,
}

/// Configuration for the mock [Hub].
#[derive(Clone, Debug)]
pub struct Config {
    /// Chains messages may be routed to.
    pub chains: Vec<String>,

    /// Initial verifier set.
    pub verifiers: VerifierSet,

    /// Behavior of verifiers without an explicit [Behavior].
    pub behavior: Behavior,

    /// Age at which a session that has not reached its threshold expires.
    pub session_timeout: Duration,
}

struct Entry {
    session: Session,
    created: SystemTime,
    verifiers: VerifierSet,
    behaviors: BTreeMap<String, Behavior>,
    messages: Vec<Message>,
}

struct State {
    chains: BTreeSet<String>,
    verifiers: VerifierSet,
    default: Behavior,
    behaviors: BTreeMap<String, Behavior>,
    session_timeout: Duration,
    messages: BTreeMap<CrossChainId, Message>,
    next_message: u64,
    sessions: BTreeMap<session::Id, Entry>,
    next_session: session::Id,
    failures: usize,
    requests: usize,
}

impl State {
    /// Apply every signature and timeout that is due by `now`.
    fn evaluate(&mut self, now: SystemTime) {
        let timeout = self.session_timeout;
        for (id, entry) in self.sessions.iter_mut() {
            if entry.session.status().is_terminal() {
                continue;
            }
            let expires = entry.created + timeout;
            for (signer, weight) in &entry.verifiers.signers {
                let behavior = entry.behaviors.get(signer).copied();
                let Some(Behavior::Sign(delay)) = behavior else {
                    continue;
                };
                let at = entry.created + delay;
                if at <= now && at < expires {
                    entry.session.sign(signer, *weight);
                }
            }
            if entry.session.reached() {
                let proof = Proof {
                    epoch: entry.verifiers.epoch,
                    signers: entry.session.signers().map(|(name, _)| name.clone()).collect(),
                    messages: entry.messages.clone(),
                };
                entry.session.complete(proof.encode().freeze());
            } else if now >= expires {
                entry.session.expire();
                debug!(session = *id, "session expired");
            }
        }
    }

    fn inject_failure(&mut self) -> Result<(), Error> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(Error::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

/// In-memory hub.
#[derive(Clone)]
pub struct Hub<E: Clock> {
    context: E,
    state: Arc<Mutex<State>>,
}

impl<E: Clock> Hub<E> {
    pub fn new(context: E, cfg: Config) -> Self {
        let state = State {
            chains: cfg.chains.into_iter().collect(),
            verifiers: cfg.verifiers,
            default: cfg.behavior,
            behaviors: BTreeMap::new(),
            session_timeout: cfg.session_timeout,
            messages: BTreeMap::new(),
            next_message: 1,
            sessions: BTreeMap::new(),
            next_session: 1,
            failures: 0,
            requests: 0,
        };
        Self {
            context,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Set how `verifier` reacts to sessions created from now on.
    pub fn set_behavior(&self, verifier: &str, behavior: Behavior) {
        let mut state = self.state.lock().unwrap();
        state.behaviors.insert(verifier.to_string(), behavior);
    }

    /// Set how every verifier reacts to sessions created from now on.
    pub fn set_all(&self, behavior: Behavior) {
        let mut state = self.state.lock().unwrap();
        state.default = behavior;
        state.behaviors.clear();
    }

    /// Replace the active verifier set (sessions already created keep their set).
    pub fn rotate(&self, verifiers: VerifierSet) {
        let mut state = self.state.lock().unwrap();
        state.verifiers = verifiers;
    }

    /// Fail the next `n` requests with [Error::Unavailable].
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().failures = n;
    }

    /// Number of sessions created so far.
    pub fn sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Number of requests served (including failed ones).
    pub fn requests(&self) -> usize {
        self.state.lock().unwrap().requests
    }
}

impl<E: Clock> HubTrait for Hub<E> {
    async fn call_contract(
        &self,
        source_chain: &str,
        source_address: &str,
        destination_chain: &str,
        destination_address: &str,
        payload: Bytes,
    ) -> Result<CrossChainMessage, Error> {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        state.inject_failure()?;
        if !state.chains.contains(destination_chain) {
            return Err(Error::UnknownChain(destination_chain.to_string()));
        }
        let id = format!("msg-{}", state.next_message);
        state.next_message += 1;
        let message = Message {
            cc_id: CrossChainId::new(source_chain, id),
            source_address: source_address.to_string(),
            destination_chain: destination_chain.to_string(),
            destination_address: destination_address.to_string(),
            payload_hash: payload_hash(&payload),
        };
        state.messages.insert(message.cc_id.clone(), message.clone());
        Ok(CrossChainMessage { message, payload })
    }

    async fn construct_proof(&self, cc_ids: &[CrossChainId]) -> Result<session::Id, Error> {
        let now = self.context.current();
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        state.inject_failure()?;
        if cc_ids.is_empty() {
            return Err(Error::EmptyBatch);
        }

        // Resolve messages (sorted and de-duplicated)
        let requested: BTreeSet<_> = cc_ids.iter().cloned().collect();
        let mut messages = Vec::with_capacity(requested.len());
        for cc_id in &requested {
            let message = state
                .messages
                .get(cc_id)
                .ok_or_else(|| Error::UnknownMessage(cc_id.clone()))?;
            messages.push(message.clone());
        }
        let destination = &messages[0].destination_chain;
        if messages.iter().any(|m| &m.destination_chain != destination) {
            return Err(Error::MixedDestinations);
        }

        // Reuse a pending session over the same messages
        state.evaluate(now);
        let requested: Vec<_> = requested.into_iter().collect();
        let existing = state.sessions.iter().find(|(_, entry)| {
            !entry.session.status().is_terminal() && entry.session.cc_ids() == requested.as_slice()
        });
        if let Some((id, _)) = existing {
            return Ok(*id);
        }

        // Create a new session signed by the active verifier set
        let id = state.next_session;
        state.next_session += 1;
        let verifiers = state.verifiers.clone();
        let behaviors = verifiers
            .signers
            .keys()
            .map(|signer| {
                let behavior = state.behaviors.get(signer).copied().unwrap_or(state.default);
                (signer.clone(), behavior)
            })
            .collect();
        let entry = Entry {
            session: Session::new(id, requested, verifiers.threshold),
            created: now,
            verifiers,
            behaviors,
            messages,
        };
        state.sessions.insert(id, entry);
        Ok(id)
    }

    async fn proof(&self, session: session::Id) -> Result<Status, Error> {
        let now = self.context.current();
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        state.inject_failure()?;
        state.evaluate(now);
        state
            .sessions
            .get(&session)
            .map(|entry| entry.session.status().clone())
            .ok_or(Error::UnknownSession(session))
    }

    async fn message(&self, cc_id: &CrossChainId) -> Result<Option<Message>, Error> {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        state.inject_failure()?;
        Ok(state.messages.get(cc_id).cloned())
    }
}
