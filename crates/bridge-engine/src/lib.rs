//! # Bridge Engine
//!
//! Engine behind the ledger gateway API. It builds signed transactions out of
//! client-described operations, submits transactions for the accounts it holds
//! seeds for, and watches the ledger for payments to a receiving account,
//! notifying a callback about each of them.
//!
//! The engine talks to the ledger through [`horizon::LedgerClient`] and keeps
//! its state behind the store traits in [`utils::types`]. A Redis
//! implementation of them is available with the `redis` feature.
#[cfg(feature = "redis")]
pub mod backends;
pub mod assembler;
pub mod compliance;
pub mod engine;
pub mod envelope;
pub mod errors;
pub mod horizon;
pub mod listener;
pub mod notifier;
pub mod operations;
pub mod run;
pub mod sequence;
pub mod submitter;
pub mod utils;

pub use engine::{BridgeEngine, EngineAccounts};
pub use errors::GatewayError;
#[cfg(feature = "redis")]
pub use run::run_bridge_engine;
