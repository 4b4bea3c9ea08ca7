//! Identities shared by every component of the coordinator.
//!
//! A message routed through the hub is identified by its [CrossChainId] (the pair
//! `(source_chain, message_id)`). Once a destination gateway approves it, the message
//! is additionally addressed by a [CommandId]: the idempotency key the gateway uses to
//! mark the message approved (and later consumed) exactly once.

use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::{sha256::Digest, Hasher, Sha256};
use commonware_utils::{from_hex_formatted, hex};
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error as ThisError;

/// Maximum length (in bytes) of a governance [Address].
pub const MAX_ADDRESS_LENGTH: usize = 64;

/// Maximum length (in bytes) of a chain name, message id or chain-formatted address.
pub const MAX_NAME_LENGTH: usize = 256;

/// Separator between the source chain and the message id when deriving an amplifier [CommandId].
const COMMAND_ID_SEPARATOR: &[u8] = b"-";

/// Prefix used when deriving a legacy (sequence-based) [CommandId].
const LEGACY_PREFIX: &[u8] = b"legacy";

/// Seconds elapsed since the unix epoch at `time` (zero if `time` precedes the epoch).
pub fn unix(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Hash the concatenation of `parts`.
pub(crate) fn digest(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Compute the hash the destination stores for an approved payload.
pub fn payload_hash(payload: &[u8]) -> Digest {
    digest(&[payload])
}

/// Write a `u32` length prefix followed by `value`.
pub(crate) fn write_bytes(value: &[u8], buf: &mut impl BufMut) {
    let len = u32::try_from(value.len()).expect("length exceeds u32");
    len.write(buf);
    buf.put_slice(value);
}

/// Encoded size of a value written with [write_bytes].
pub(crate) fn bytes_size(value: &[u8]) -> usize {
    u32::SIZE + value.len()
}

/// Read a value written with [write_bytes], rejecting anything longer than `max`.
pub(crate) fn read_bytes(
    buf: &mut impl Buf,
    max: usize,
    context: &'static str,
) -> Result<Bytes, Error> {
    let len = u32::read(buf)? as usize;
    if len > max {
        return Err(Error::Invalid(context, "too long"));
    }
    if buf.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    Ok(buf.copy_to_bytes(len))
}

/// Read a UTF-8 string written with [write_bytes].
pub(crate) fn read_string(
    buf: &mut impl Buf,
    max: usize,
    context: &'static str,
) -> Result<String, Error> {
    let raw = read_bytes(buf, max, context)?;
    String::from_utf8(raw.to_vec()).map_err(|_| Error::Invalid(context, "not utf-8"))
}

/// Returned when an [Address] would be empty or longer than [MAX_ADDRESS_LENGTH].
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("invalid address length: {0}")]
pub struct InvalidAddress(pub usize);

/// Opaque, chain-formatted address of a governance target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(Bytes);

impl Address {
    /// Parse a (optionally `0x`-prefixed) hex string.
    pub fn from_hex(value: &str) -> Option<Self> {
        let raw = from_hex_formatted(value)?;
        Self::try_from(raw).ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<Bytes> for Address {
    type Error = InvalidAddress;

    fn try_from(value: Bytes) -> Result<Self, Self::Error> {
        if value.is_empty() || value.len() > MAX_ADDRESS_LENGTH {
            return Err(InvalidAddress(value.len()));
        }
        Ok(Self(value))
    }
}

impl TryFrom<Vec<u8>> for Address {
    type Error = InvalidAddress;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::try_from(Bytes::from(value))
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = InvalidAddress;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(Bytes::copy_from_slice(value))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

impl Write for Address {
    fn write(&self, buf: &mut impl BufMut) {
        write_bytes(&self.0, buf);
    }
}

impl Read for Address {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let raw = read_bytes(buf, MAX_ADDRESS_LENGTH, "Address")?;
        if raw.is_empty() {
            return Err(Error::Invalid("Address", "empty"));
        }
        Ok(Self(raw))
    }
}

impl EncodeSize for Address {
    fn encode_size(&self) -> usize {
        bytes_size(&self.0)
    }
}

/// Native value attached to a proposal: an unsigned 256-bit integer stored big-endian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value([u8; 32]);

impl Value {
    pub const ZERO: Self = Self([0u8; 32]);

    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Returns the value as a `u128` if it fits.
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(low))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::from(u128::from(value))
    }
}

impl From<u128> for Value {
    fn from(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u128() {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "0x{}", hex(&self.0)),
        }
    }
}

impl Write for Value {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Value {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        Ok(Self(<[u8; 32]>::read(buf)?))
    }
}

impl FixedSize for Value {
    const SIZE: usize = 32;
}

/// Identity of a message routed through the hub: `(source_chain, message_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrossChainId {
    pub chain: String,
    pub id: String,
}

impl CrossChainId {
    pub fn new(chain: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for CrossChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.id)
    }
}

impl Write for CrossChainId {
    fn write(&self, buf: &mut impl BufMut) {
        write_bytes(self.chain.as_bytes(), buf);
        write_bytes(self.id.as_bytes(), buf);
    }
}

impl Read for CrossChainId {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let chain = read_string(buf, MAX_NAME_LENGTH, "CrossChainId.chain")?;
        let id = read_string(buf, MAX_NAME_LENGTH, "CrossChainId.id")?;
        Ok(Self { chain, id })
    }
}

impl EncodeSize for CrossChainId {
    fn encode_size(&self) -> usize {
        bytes_size(self.chain.as_bytes()) + bytes_size(self.id.as_bytes())
    }
}

/// Routable header of a cross-chain message (everything but the payload itself).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub cc_id: CrossChainId,
    pub source_address: String,
    pub destination_chain: String,
    pub destination_address: String,
    pub payload_hash: Digest,
}

impl Write for Message {
    fn write(&self, buf: &mut impl BufMut) {
        self.cc_id.write(buf);
        write_bytes(self.source_address.as_bytes(), buf);
        write_bytes(self.destination_chain.as_bytes(), buf);
        write_bytes(self.destination_address.as_bytes(), buf);
        self.payload_hash.write(buf);
    }
}

impl Read for Message {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let cc_id = CrossChainId::read(buf)?;
        let source_address = read_string(buf, MAX_NAME_LENGTH, "Message.source_address")?;
        let destination_chain = read_string(buf, MAX_NAME_LENGTH, "Message.destination_chain")?;
        let destination_address =
            read_string(buf, MAX_NAME_LENGTH, "Message.destination_address")?;
        let payload_hash = Digest::read(buf)?;
        Ok(Self {
            cc_id,
            source_address,
            destination_chain,
            destination_address,
            payload_hash,
        })
    }
}

impl EncodeSize for Message {
    fn encode_size(&self) -> usize {
        self.cc_id.encode_size()
            + bytes_size(self.source_address.as_bytes())
            + bytes_size(self.destination_chain.as_bytes())
            + bytes_size(self.destination_address.as_bytes())
            + Digest::SIZE
    }
}

/// A routed [Message] together with the payload it commits to.
///
/// The hub only ever sees the payload hash; the caller keeps the payload because the
/// destination requires the exact original bytes at execution time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrossChainMessage {
    pub message: Message,
    pub payload: Bytes,
}

impl CrossChainMessage {
    pub fn cc_id(&self) -> &CrossChainId {
        &self.message.cc_id
    }

    /// Returns true if the payload matches the hash committed to by the header.
    pub fn verify(&self) -> bool {
        payload_hash(&self.payload) == self.message.payload_hash
    }
}

/// Idempotency key of a message on a destination gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(Digest);

impl CommandId {
    /// Derive the key used by amplifier gateways.
    pub fn from_cc_id(cc_id: &CrossChainId) -> Self {
        Self(digest(&[
            cc_id.chain.as_bytes(),
            COMMAND_ID_SEPARATOR,
            cc_id.id.as_bytes(),
        ]))
    }

    /// Derive the key used by legacy gateways, which number approvals sequentially.
    pub fn from_sequence(sequence: u64) -> Self {
        Self(digest(&[LEGACY_PREFIX, &sequence.to_be_bytes()]))
    }

    pub fn digest(&self) -> &Digest {
        &self.0
    }
}

impl From<Digest> for CommandId {
    fn from(value: Digest) -> Self {
        Self(value)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

impl Write for CommandId {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for CommandId {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        Ok(Self(Digest::read(buf)?))
    }
}

impl FixedSize for CommandId {
    const SIZE: usize = Digest::SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    #[test]
    fn test_command_id_derivation() {
        let a = CommandId::from_cc_id(&CrossChainId::new("axelar", "msg-1"));
        let b = CommandId::from_cc_id(&CrossChainId::new("axelar", "msg-1"));
        let c = CommandId::from_cc_id(&CrossChainId::new("axelar", "msg-2"));
        assert_eq!(a, b);
        assert_ne!(a, c);

        // The separator keeps ("ab", "c") and ("a", "bc") apart
        let d = CommandId::from_cc_id(&CrossChainId::new("ab", "c"));
        let e = CommandId::from_cc_id(&CrossChainId::new("a", "bc"));
        assert_ne!(d, e);

        // Legacy keys never collide with each other
        assert_ne!(CommandId::from_sequence(0), CommandId::from_sequence(1));
    }

    #[test]
    fn test_address_bounds() {
        assert_eq!(Address::try_from(Vec::new()), Err(InvalidAddress(0)));
        assert_eq!(
            Address::try_from(vec![1u8; MAX_ADDRESS_LENGTH + 1]),
            Err(InvalidAddress(MAX_ADDRESS_LENGTH + 1))
        );
        let address = Address::from_hex("0xaaaa").unwrap();
        assert_eq!(address.as_bytes(), &[0xaa, 0xaa]);
        assert_eq!(address.to_string(), "0xaaaa");
    }

    #[test]
    fn test_value() {
        assert!(Value::ZERO.is_zero());
        let value = Value::from(1_000u64);
        assert_eq!(value.to_u128(), Some(1_000));
        assert_eq!(value.to_string(), "1000");

        let mut big = [0u8; 32];
        big[0] = 1;
        let big = Value::from_be_bytes(big);
        assert_eq!(big.to_u128(), None);
        assert!(big > value);
    }

    #[test]
    fn test_message_codec() {
        let payload = b"hello";
        let message = Message {
            cc_id: CrossChainId::new("axelar", "msg-1"),
            source_address: "governance".into(),
            destination_chain: "solana".into(),
            destination_address: "gov".into(),
            payload_hash: payload_hash(payload),
        };
        let encoded = message.encode();
        assert_eq!(encoded.len(), message.encode_size());
        assert_eq!(Message::decode(encoded).unwrap(), message);

        let routed = CrossChainMessage {
            message,
            payload: Bytes::from_static(payload),
        };
        assert!(routed.verify());
    }

    #[test]
    fn test_oversized_name_rejected() {
        let cc_id = CrossChainId::new("a".repeat(MAX_NAME_LENGTH + 1), "msg-1");
        let encoded = cc_id.encode();
        assert!(matches!(
            CrossChainId::decode(encoded),
            Err(Error::Invalid("CrossChainId.chain", _))
        ));
    }
}
