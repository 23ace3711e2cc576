//! Per-sequence agreement bookkeeping.

use std::collections::{HashMap, HashSet};

use pbft_types::{PrePrepareArgs, ReplicaId};

/// Consensus state for one sequence number.
///
/// Created lazily on the first message referencing its sequence and kept
/// for the process lifetime (no garbage collection in this core).
///
/// Invariants:
/// - `prepared ⇒ pre_prepared ∧ |prepare_from| ≥ 2f` (the primary's
///   pre-prepare counts implicitly toward the prepare quorum)
/// - `committed ⇒ prepared ∧ |commit_from| ≥ 2f+1` (own commit included)
/// - `pre_prepare`, once set, is immutable for this (view, seq)
/// - `reply_sent` transitions false→true exactly once
#[derive(Debug, Default)]
pub struct RequestState {
    pub pre_prepared: bool,
    pub prepared: bool,
    pub committed: bool,

    /// The accepted proposal, holding the encoded command batch.
    pub pre_prepare: Option<PrePrepareArgs>,

    /// Replicas whose prepare vote has been recorded (self included once
    /// the pre-prepare is accepted).
    pub prepare_from: HashSet<ReplicaId>,

    /// Replicas whose commit vote has been recorded (self included once
    /// the prepared predicate fires).
    pub commit_from: HashSet<ReplicaId>,

    /// Execution results reported for this sequence (primary only).
    pub replies: HashMap<ReplicaId, Vec<u8>>,

    /// Set when the primary has answered the client callbacks; later
    /// replies for this sequence are ignored.
    pub reply_sent: bool,
}
