//! PBFT consensus engine.
//!
//! This crate implements the per-sequence agreement state machine: message
//! bookkeeping, quorum accumulation, phase transitions, deterministic
//! execution against the key-value store, and client-reply aggregation.
//!
//! # Architecture
//!
//! The engine is synchronous and performs no I/O of its own except through
//! the injected [`CommandLog`]. Inbound handlers mutate state and return
//! [`Action`]s: outbound messages for the node runtime to sign and
//! dispatch after the engine lock is released.
//!
//! ```text
//! verified message → ReplicaState::handle_*() → Vec<Action> → dispatch
//! ```
//!
//! Signature verification happens *before* a message reaches the engine;
//! by the time a handler runs, the sender identity is trusted.
//!
//! Phase transitions per sequence are monotonic
//! (`∅ → PrePrepared → Prepared → Committed → Executed → Replied`) and
//! guarded by booleans, so duplicate or reordered messages cannot re-fire
//! side effects. Execution of sequence `n` does not wait for `n-1`: with
//! the view pinned and no view change, per-sequence agreement alone keeps
//! correct replicas identical.

pub mod kv;
pub mod log;
mod request;
mod state;

pub use kv::{KvStore, StateChecksum};
pub use log::{CommandLog, MemoryLog, WalError};
pub use request::RequestState;
pub use state::{Action, CommandResponse, HandleError, ReplicaState, ReplySender};
