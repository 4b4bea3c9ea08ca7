//! In-memory collaborators for testing and simulation.
//!
//! [Hub] and [Ledger] model the observable behavior of the hub and of a destination
//! ledger (threshold weight, verifier-set retention, exactly-once consumption,
//! timelocks) without any real cryptography. They share the [Proof] encoding.

mod destination;
mod hub;
mod proof;

pub use destination::{Config as LedgerConfig, Effect, Ledger};
pub use hub::{Behavior, Config as HubConfig, Hub};
pub use proof::{Proof, VerifierSet};
