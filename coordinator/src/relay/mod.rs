//! Route messages through the hub and drive proof-construction sessions.
//!
//! The hub is reached through the [Hub] adapter. [Client] wraps an adapter with retries
//! (for transient RPC failures) and logging; it is the only type the orchestrator talks
//! to.
//!
//! Routing a message is fire-and-forget: [Hub::call_contract] only records the message
//! and returns its identity. Whether (and when) it is signed is observed by polling a
//! session created with [Hub::construct_proof].

use crate::{
    session::{self, Status},
    types::{CrossChainId, CrossChainMessage, Message},
};
use bytes::Bytes;
use std::future::Future;
use thiserror::Error;

mod client;
pub use client::Client;

/// Errors returned by a [Hub].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("hub unavailable: {0}")]
    Unavailable(String),
    #[error("unknown session: {0}")]
    UnknownSession(session::Id),
    #[error("unknown message: {0}")]
    UnknownMessage(CrossChainId),
    #[error("messages target different destination chains")]
    MixedDestinations,
    #[error("empty proof request")]
    EmptyBatch,
    #[error("unknown destination chain: {0}")]
    UnknownChain(String),
}

impl Error {
    /// Returns true if the same request may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}

/// Message and proof query surface of the hub.
pub trait Hub: Clone + Send + Sync + 'static {
    /// Route `payload` from `(source_chain, source_address)` to
    /// `(destination_chain, destination_address)`.
    fn call_contract(
        &self,
        source_chain: &str,
        source_address: &str,
        destination_chain: &str,
        destination_address: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<CrossChainMessage, Error>> + Send;

    /// Request a proof over `cc_ids` (all routed to the same destination chain).
    ///
    /// Permissionless and safe to call repeatedly.
    fn construct_proof(
        &self,
        cc_ids: &[CrossChainId],
    ) -> impl Future<Output = Result<session::Id, Error>> + Send;

    /// Single, non-blocking query of a session's status.
    fn proof(&self, session: session::Id) -> impl Future<Output = Result<Status, Error>> + Send;

    /// Routed state of a message (if the hub knows it).
    fn message(
        &self,
        cc_id: &CrossChainId,
    ) -> impl Future<Output = Result<Option<Message>, Error>> + Send;
}
