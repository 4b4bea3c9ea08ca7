//! Proof blob exchanged between the mock hub and the mock ledger.

use crate::types::{bytes_size, read_string, write_bytes, Message, MAX_NAME_LENGTH};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use std::collections::BTreeMap;

/// Maximum number of signers (or messages) a proof may carry.
const MAX_ITEMS: usize = 1024;

/// A weighted verifier set identified by its epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifierSet {
    pub epoch: u64,
    pub signers: BTreeMap<String, u64>,
    pub threshold: u64,
}

impl VerifierSet {
    pub fn new<S: Into<String>>(
        epoch: u64,
        signers: impl IntoIterator<Item = (S, u64)>,
        threshold: u64,
    ) -> Self {
        Self {
            epoch,
            signers: signers
                .into_iter()
                .map(|(name, weight)| (name.into(), weight))
                .collect(),
            threshold,
        }
    }

    /// Sum of the weights of the distinct members among `signers` (`None` if any
    /// signer is not a member).
    pub fn weight<'a>(&self, signers: impl IntoIterator<Item = &'a String>) -> Option<u64> {
        let mut seen = Vec::new();
        let mut total = 0u64;
        for signer in signers {
            let weight = self.signers.get(signer)?;
            if seen.contains(&signer) {
                continue;
            }
            seen.push(signer);
            total = total.saturating_add(*weight);
        }
        Some(total)
    }
}

/// Encoded proof (`execute_data`) produced by a completed session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub epoch: u64,
    pub signers: Vec<String>,
    pub messages: Vec<Message>,
}

impl Write for Proof {
    fn write(&self, buf: &mut impl BufMut) {
        self.epoch.write(buf);
        (self.signers.len() as u32).write(buf);
        for signer in &self.signers {
            write_bytes(signer.as_bytes(), buf);
        }
        (self.messages.len() as u32).write(buf);
        for message in &self.messages {
            message.write(buf);
        }
    }
}

impl Read for Proof {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let epoch = u64::read(buf)?;
        let count = u32::read(buf)? as usize;
        if count > MAX_ITEMS {
            return Err(Error::Invalid("Proof.signers", "too many"));
        }
        let mut signers = Vec::with_capacity(count);
        for _ in 0..count {
            signers.push(read_string(buf, MAX_NAME_LENGTH, "Proof.signer")?);
        }
        let count = u32::read(buf)? as usize;
        if count > MAX_ITEMS {
            return Err(Error::Invalid("Proof.messages", "too many"));
        }
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            messages.push(Message::read(buf)?);
        }
        Ok(Self {
            epoch,
            signers,
            messages,
        })
    }
}

impl EncodeSize for Proof {
    fn encode_size(&self) -> usize {
        u64::SIZE
            + u32::SIZE
            + self
                .signers
                .iter()
                .map(|signer| bytes_size(signer.as_bytes()))
                .sum::<usize>()
            + u32::SIZE
            + self.messages.iter().map(|m| m.encode_size()).sum::<usize>()
    }
}
