//! PBFT replica runtime.
//!
//! Everything around the consensus engine that touches the outside world:
//! cluster configuration, the TCP RPC surface, the write-ahead log, the
//! client-request batching pipeline, the synthetic load driver, and
//! bootstrap. The `pbft` binary in `src/bin` is a thin CLI over
//! [`start`].

mod config;
mod node;
mod pipeline;
pub mod rpc;
mod storage;
pub mod workload;

pub use config::{ClusterConfig, ConfigError};
pub use node::{start, Node, NodeHandle, NodeOptions, StartError};
pub use pipeline::Submission;
pub use storage::Wal;
