//! Protocol message records.
//!
//! One argument record and one reply record per RPC method. Replies carry
//! at minimum a `success` flag; a `false` reply means the message was
//! dropped (bad signature, view mismatch, storage failure) and is never
//! treated as a protocol error by the sender.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::identifiers::ReplicaId;

/// RPC method names, as they appear on the wire.
pub mod method {
    pub const PRE_PREPARE: &str = "PBFT.PrePrepare";
    pub const PREPARE: &str = "PBFT.Prepare";
    pub const COMMIT: &str = "PBFT.Commit";
    pub const CLIENT_REPLY: &str = "PBFT.ClientReply";
    pub const GET_STATE_CHECKSUM: &str = "PBFT.GetStateChecksum";
}

/// Primary's proposal for a sequence number: the encoded command batch plus
/// the digest the cluster will vote on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepareArgs {
    pub view: u64,
    pub seq: u64,
    pub digest: Digest,
    /// Encoded command batch (see [`crate::encode_batch`]).
    pub command: Vec<u8>,
    /// Authenticator over the pre-prepare payload, bound to the primary.
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrePrepareReply {
    pub success: bool,
}

/// A replica's vote that it accepted the pre-prepare for `(view, seq)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareArgs {
    pub view: u64,
    pub seq: u64,
    pub digest: Digest,
    pub node: ReplicaId,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrepareReply {
    pub success: bool,
}

/// A replica's vote that `(view, seq)` is prepared cluster-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitArgs {
    pub view: u64,
    pub seq: u64,
    pub digest: Digest,
    pub node: ReplicaId,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommitReply {
    pub success: bool,
}

/// A replica's execution result for a committed sequence, reported to the
/// primary for f+1 matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientReplyArgs {
    pub seq: u64,
    pub node: ReplicaId,
    /// Encoded result batch (see [`crate::encode_results`]).
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClientReplyReply {
    pub success: bool,
}

/// Out-of-band state inspection request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GetStateChecksumArgs {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStateChecksumReply {
    /// SHA-256 over `"{k}:{v};"` for every entry in lexicographic key order.
    pub checksum: String,
    pub count: u64,
}
