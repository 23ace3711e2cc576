//! Canonical signed payloads.
//!
//! Every protocol message is authenticated over a short ASCII string built
//! from the fields that identify it:
//!
//! ```text
//! pre-prepare:  "{view}:{seq}:{digest}"
//! prepare:      "{view}:{seq}:{digest}:{node}"
//! commit:       "{view}:{seq}:{digest}:{node}"
//! ```
//!
//! Prepare and commit payloads include the sender id so a tag produced by
//! one replica cannot be replayed as another replica's vote.

use crate::digest::Digest;
use crate::identifiers::ReplicaId;

/// Payload covered by a pre-prepare signature.
pub fn pre_prepare_payload(view: u64, seq: u64, digest: &Digest) -> Vec<u8> {
    format!("{view}:{seq}:{digest}").into_bytes()
}

/// Payload covered by a prepare signature.
pub fn prepare_payload(view: u64, seq: u64, digest: &Digest, node: ReplicaId) -> Vec<u8> {
    format!("{view}:{seq}:{digest}:{node}").into_bytes()
}

/// Payload covered by a commit signature.
pub fn commit_payload(view: u64, seq: u64, digest: &Digest, node: ReplicaId) -> Vec<u8> {
    format!("{view}:{seq}:{digest}:{node}").into_bytes()
}
