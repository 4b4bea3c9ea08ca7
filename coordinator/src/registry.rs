//! Read-only lookup table of destination chains.
//!
//! The registry is built once (usually deserialized from JSON by the binary) and shared
//! as an `Arc<Registry>` by every component that needs to resolve a chain. Nothing in
//! the library mutates it.

use crate::{destination::Kind, proposal};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops::RangeInclusive, sync::Arc};
use thiserror::Error;

/// Range of minimum eta delays (in seconds) a governance contract may be configured with.
pub const MINIMUM_ETA_DELAY: RangeInclusive<u64> = 3600..=86400;

/// Errors that can occur when resolving or validating the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown chain: {0}")]
    UnknownChain(String),
    #[error("invalid minimum eta delay for {chain}: {delay}s")]
    InvalidDelay { chain: String, delay: u64 },
    #[error("invalid registry: {0}")]
    Parse(String),
}

/// The `(chain, address)` pair a governance contract accepts commands from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub chain: String,
    pub address: String,
}

/// Deployment of the coordinator-facing contracts on one destination chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    /// Entry point variant used to execute approved payloads.
    pub kind: Kind,

    /// Address of the gateway (formatted for the destination chain).
    pub gateway: String,

    /// Address of the governance contract (formatted for the destination chain).
    pub governance: String,

    /// Source of truth for governance commands.
    pub authority: Authority,

    /// Minimum delay (seconds) between scheduling a timelock proposal and its eta.
    pub minimum_eta_delay: u64,

    /// Whether the governance contract supports the operator path.
    #[serde(default = "enabled")]
    pub operator_commands: bool,
}

fn enabled() -> bool {
    true
}

impl Chain {
    /// Command kinds the governance contract understands.
    pub fn commands(&self) -> Vec<proposal::Kind> {
        proposal::Kind::ALL
            .into_iter()
            .filter(|kind| self.operator_commands || !kind.is_operator())
            .collect()
    }
}

/// Destination chains keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub chains: BTreeMap<String, Chain>,
}

impl Registry {
    /// Validate every entry and freeze the registry.
    pub fn build(self) -> Result<Arc<Self>, Error> {
        for (name, chain) in &self.chains {
            if !MINIMUM_ETA_DELAY.contains(&chain.minimum_eta_delay) {
                return Err(Error::InvalidDelay {
                    chain: name.clone(),
                    delay: chain.minimum_eta_delay,
                });
            }
        }
        Ok(Arc::new(self))
    }

    /// Parse and validate a JSON registry.
    pub fn from_json(raw: &str) -> Result<Arc<Self>, Error> {
        let registry: Self =
            serde_json::from_str(raw).map_err(|err| Error::Parse(err.to_string()))?;
        registry.build()
    }

    pub fn insert(&mut self, name: impl Into<String>, chain: Chain) {
        self.chains.insert(name.into(), chain);
    }

    /// Resolve a chain by name.
    pub fn chain(&self, name: &str) -> Result<&Chain, Error> {
        self.chains
            .get(name)
            .ok_or_else(|| Error::UnknownChain(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.chains.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const RAW: &str = r#"{
        "chains": {
            "solana": {
                "kind": "amplifier",
                "gateway": "gtw",
                "governance": "gov",
                "authority": { "chain": "axelar", "address": "governance" },
                "minimum_eta_delay": 3600
            },
            "ethereum": {
                "kind": "legacy",
                "gateway": "0x01",
                "governance": "0x02",
                "authority": { "chain": "axelar", "address": "governance" },
                "minimum_eta_delay": 86400,
                "operator_commands": false
            }
        }
    }"#;

    #[test]
    fn test_from_json() {
        let registry = Registry::from_json(RAW).unwrap();
        let solana = registry.chain("solana").unwrap();
        assert_eq!(solana.kind, Kind::Amplifier);
        assert!(solana.operator_commands);
        assert_eq!(solana.commands().len(), 4);

        let ethereum = registry.chain("ethereum").unwrap();
        assert_eq!(ethereum.kind, Kind::Legacy);
        assert_eq!(
            ethereum.commands(),
            vec![
                proposal::Kind::ScheduleTimelock,
                proposal::Kind::CancelTimelock
            ]
        );

        assert_eq!(
            registry.chain("near").unwrap_err(),
            Error::UnknownChain("near".into())
        );
    }

    #[test_case(3599; "below range")]
    #[test_case(86401; "above range")]
    fn test_invalid_delay(delay: u64) {
        let raw = RAW.replace("86400", &delay.to_string());
        assert_eq!(
            Registry::from_json(&raw).unwrap_err(),
            Error::InvalidDelay {
                chain: "ethereum".into(),
                delay
            }
        );
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Registry::from_json("{ not json"),
            Err(Error::Parse(_))
        ));
    }
}
