//! Encode and decode governance commands.
//!
//! A [Command] is the payload the hub relays to a destination's governance contract.
//! Its encoding is canonical: the destination recomputes the proposal hash from the
//! decoded fields, so two logically identical commands always produce identical bytes.
//!
//! # Proposal Hash
//!
//! The proposal hash commits to `(target, call_data, native_value)` and deliberately
//! excludes `eta`. Cancelling or executing a proposal therefore requires the exact
//! original tuple, but never the eta it was scheduled with.

use crate::types::{bytes_size, digest, read_bytes, write_bytes, Address, Value};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{
    DecodeExt, Encode, EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write,
};
use commonware_cryptography::sha256::Digest;
use std::fmt;
use thiserror::Error;

/// Maximum size of the call data carried by a single command.
pub const MAX_CALL_DATA: usize = 64 * 1024;

/// Domain separator mixed into every proposal hash.
const PROPOSAL_NAMESPACE: &[u8] = b"_INTERCHAIN_GOVERNANCE_PROPOSAL";

/// Errors that can occur when building or decoding a [Command].
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid command kind: {0}")]
    InvalidCommandKind(u8),
    #[error("command {0} cannot be cancelled")]
    NotCancellable(Kind),
    #[error("malformed command: {0}")]
    Malformed(#[from] CodecError),
}

/// The governance operation a [Command] requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    ScheduleTimelock = 0,
    CancelTimelock = 1,
    ApproveOperator = 2,
    CancelOperatorApproval = 3,
}

impl Kind {
    /// Every kind a governance contract may understand.
    pub const ALL: [Kind; 4] = [
        Kind::ScheduleTimelock,
        Kind::CancelTimelock,
        Kind::ApproveOperator,
        Kind::CancelOperatorApproval,
    ];

    /// Returns true if the command is executed through the operator path (no eta).
    pub fn is_operator(&self) -> bool {
        matches!(self, Kind::ApproveOperator | Kind::CancelOperatorApproval)
    }

    /// Returns true if the command cancels a previously delivered command.
    pub fn is_cancel(&self) -> bool {
        matches!(self, Kind::CancelTimelock | Kind::CancelOperatorApproval)
    }

    /// The command that undoes this one (if any).
    pub fn cancellation(&self) -> Option<Kind> {
        match self {
            Kind::ScheduleTimelock => Some(Kind::CancelTimelock),
            Kind::ApproveOperator => Some(Kind::CancelOperatorApproval),
            Kind::CancelTimelock | Kind::CancelOperatorApproval => None,
        }
    }
}

impl TryFrom<u8> for Kind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Kind::ScheduleTimelock),
            1 => Ok(Kind::CancelTimelock),
            2 => Ok(Kind::ApproveOperator),
            3 => Ok(Kind::CancelOperatorApproval),
            other => Err(Error::InvalidCommandKind(other)),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::ScheduleTimelock => "schedule_timelock",
            Kind::CancelTimelock => "cancel_timelock",
            Kind::ApproveOperator => "approve_operator",
            Kind::CancelOperatorApproval => "cancel_operator_approval",
        };
        f.write_str(name)
    }
}

/// Compute the proposal hash of `(target, call_data, native_value)`.
///
/// Every field is length-prefixed so that moving bytes between `target` and `call_data`
/// always changes the hash.
pub fn hash(target: &Address, call_data: &[u8], native_value: &Value) -> Digest {
    let target_len = (target.as_bytes().len() as u32).to_be_bytes();
    let call_data_len = (call_data.len() as u64).to_be_bytes();
    let native_value = native_value.to_be_bytes();
    digest(&[
        PROPOSAL_NAMESPACE,
        &target_len,
        target.as_bytes(),
        &call_data_len,
        call_data,
        &native_value,
    ])
}

/// A governance command relayed to a destination chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub kind: Kind,
    pub target: Address,
    pub call_data: Bytes,
    pub native_value: Value,
    /// Earliest execution time (unix seconds). Only meaningful for [Kind::ScheduleTimelock].
    pub eta: u64,
}

impl Command {
    pub fn new(
        kind: Kind,
        target: Address,
        call_data: impl Into<Bytes>,
        native_value: Value,
        eta: u64,
    ) -> Self {
        Self {
            kind,
            target,
            call_data: call_data.into(),
            native_value,
            eta,
        }
    }

    /// The hash of the proposal this command refers to.
    pub fn proposal_hash(&self) -> Digest {
        hash(&self.target, &self.call_data, &self.native_value)
    }

    /// Ensure the destination understands this command (a kind outside `supported` is
    /// as invalid as an unknown tag).
    pub fn check(&self, supported: &[Kind]) -> Result<(), Error> {
        if self.call_data.len() > MAX_CALL_DATA {
            return Err(Error::Malformed(CodecError::Invalid(
                "Command.call_data",
                "too long",
            )));
        }
        if !supported.contains(&self.kind) {
            return Err(Error::InvalidCommandKind(self.kind as u8));
        }
        Ok(())
    }

    /// Serialize the command into the canonical payload relayed to the destination.
    pub fn to_payload(&self) -> Bytes {
        self.encode().freeze()
    }

    /// Deserialize a payload produced by [Command::to_payload].
    pub fn from_payload(payload: &[u8]) -> Result<Self, Error> {
        // Surface unknown kinds distinctly from other decoding failures
        if let Some(tag) = payload.first() {
            Kind::try_from(*tag)?;
        }
        Ok(Self::decode(payload)?)
    }
}

impl Write for Command {
    fn write(&self, buf: &mut impl BufMut) {
        (self.kind as u8).write(buf);
        self.target.write(buf);
        write_bytes(&self.call_data, buf);
        self.native_value.write(buf);
        self.eta.write(buf);
    }
}

impl Read for Command {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let tag = u8::read(buf)?;
        let kind = Kind::try_from(tag).map_err(|_| CodecError::InvalidEnum(tag))?;
        let target = Address::read(buf)?;
        let call_data = read_bytes(buf, MAX_CALL_DATA, "Command.call_data")?;
        let native_value = Value::read(buf)?;
        let eta = u64::read(buf)?;
        Ok(Self {
            kind,
            target,
            call_data,
            native_value,
            eta,
        })
    }
}

impl EncodeSize for Command {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + self.target.encode_size()
            + bytes_size(&self.call_data)
            + self.native_value.encode_size()
            + u64::SIZE
    }
}
