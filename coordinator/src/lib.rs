//! Drive governance commands and messages from a threshold-signing hub to destination ledgers.
//!
//! A governance command is encoded once ([proposal]), routed by the hub to the governance
//! contract of a destination chain ([relay]), signed by a threshold of verifiers in a proof
//! session ([session]), approved on the destination gateway and executed there exactly once
//! ([destination]). Timelock proposals are then executed once their eta has passed; operator
//! proposals as soon as their approval is observed. [orchestrator] sequences the whole pipeline.
//!
//! # Architecture
//!
//! ```txt
//!                        +--------------+
//!                        |              |
//!                        |     Hub      |<-------------------------+
//!                        |              |                          |
//!                        +--+--------+--+                          |
//!                           ^        |                             |
//!   call_contract           |        | proof (execute_data)        | construct_proof
//!                           |        v                             |
//!                        +--+----------------+             +-------+-------+
//!                        |                   |             |               |
//!  Command ------------->|   Orchestrator    +------------>|  relay::Client|
//!                        |                   |             |               |
//!                        +--+----------------+             +---------------+
//!                           |
//!     approve, execute,     |
//!     execute_proposal      v
//!                        +-------------------+
//!                        |                   |
//!                        |     Submitter     |--- Registry (Arc, read-only)
//!                        |                   |
//!                        +--+------------+---+
//!                           |            |
//!                           v            v
//!                     +-----------+ +-----------+
//!                     |  Gateway  | |  Gateway  |
//!                     | + Govern. | | + Govern. |
//!                     | (legacy)  | |(amplifier)|
//!                     +-----------+ +-----------+
//! ```
//!
//! # Adapters
//!
//! The hub and the destination ledgers are reached through the [relay::Hub] and
//! [destination::Destination] traits. [mocks] provides in-memory implementations of both
//! (threshold weight, verifier-set rotation, exactly-once consumption, timelocks) used by the
//! tests and by the `coordinator` binary.
//!
//! # Time
//!
//! Every wait (proof sessions, etas, transient failures) goes through [backoff::retry] on the
//! runtime [commonware_runtime::Clock], so whole pipelines run on the deterministic runtime in
//! simulated time.

pub mod backoff;
pub mod destination;
pub mod mocks;
pub mod orchestrator;
pub mod proposal;
pub mod registry;
pub mod relay;
pub mod session;
pub mod types;

pub use orchestrator::{Config, Orchestrator};
pub use proposal::Command;
pub use registry::Registry;
pub use types::{Address, CommandId, CrossChainId, CrossChainMessage, Message, Value};
