//! The consensus engine.
//!
//! One [`ReplicaState`] per process, guarded by the node's engine lock.
//! Handlers are bounded critical sections: they validate against the
//! current view, mutate per-sequence state, evaluate the phase predicates,
//! and return the outbound messages those transitions imply. Signing and
//! network dispatch happen outside, after the lock is released.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use pbft_types::{
    decode_batch, decode_results, encode_results, primary_for_view, ClientReplyArgs, Digest,
    PrePrepareArgs, ReplicaId,
};

use crate::kv::{KvStore, StateChecksum};
use crate::log::{CommandLog, WalError};
use crate::request::RequestState;

/// Outcome delivered to one client callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub success: bool,
    pub value: String,
}

impl CommandResponse {
    pub fn ok(value: String) -> Self {
        Self {
            success: true,
            value,
        }
    }

    pub fn failed(reason: &str) -> Self {
        Self {
            success: false,
            value: reason.to_string(),
        }
    }
}

/// One pending client callback, resolved when the primary collects f+1
/// matching execution results.
pub type ReplySender = oneshot::Sender<CommandResponse>;

/// Outbound work implied by a handler's state transition.
///
/// Actions are passive data; the node runtime signs and dispatches them
/// from detached tasks after releasing the engine lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Broadcast this replica's prepare vote to every peer.
    BroadcastPrepare { view: u64, seq: u64, digest: Digest },

    /// Broadcast this replica's commit vote to every peer.
    BroadcastCommit { view: u64, seq: u64, digest: Digest },

    /// Report this replica's execution result to the primary.
    SendClientReply { to: ReplicaId, args: ClientReplyArgs },
}

/// Errors surfaced by the engine handlers.
///
/// None of these propagate past the RPC handler: a view mismatch is
/// silently dropped, a storage failure aborts the sequence on this replica
/// only. Both answer the caller with `success = false`.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("view mismatch: message for view {got}, replica in view {expected}")]
    ViewMismatch { expected: u64, got: u64 },

    #[error("log append failed: {0}")]
    Storage(#[from] WalError),

    #[error("client replies are aggregated by the primary only")]
    NotPrimary,
}

/// Consensus state for one replica.
pub struct ReplicaState {
    id: ReplicaId,
    cluster_size: usize,

    /// Pinned at 0 in this core; messages for any other view are dropped.
    view: u64,

    /// Last sequence number assigned by this replica as primary.
    sequence: u64,

    /// Per-sequence agreement state, created lazily.
    requests: HashMap<u64, RequestState>,

    /// Ordered client callbacks per proposed sequence (primary only).
    pending_replies: HashMap<u64, Vec<ReplySender>>,

    store: KvStore,
    log: Box<dyn CommandLog>,
}

impl ReplicaState {
    pub fn new(id: ReplicaId, cluster_size: usize, log: Box<dyn CommandLog>) -> Self {
        Self {
            id,
            cluster_size,
            view: 0,
            sequence: 0,
            requests: HashMap::new(),
            pending_replies: HashMap::new(),
            store: KvStore::new(),
            log,
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    /// Tolerated Byzantine faults: `f = (N - 1) / 3`.
    pub fn f(&self) -> usize {
        (self.cluster_size - 1) / 3
    }

    pub fn primary(&self) -> ReplicaId {
        primary_for_view(self.view, self.cluster_size)
    }

    pub fn is_primary(&self) -> bool {
        self.primary() == self.id
    }

    /// Checksum of the state machine, served from the shared-read path.
    pub fn state_checksum(&self) -> StateChecksum {
        self.store.checksum()
    }

    // ------------------------------------------------------------------
    // Primary path
    // ------------------------------------------------------------------

    /// Record a proposal for the next sequence number.
    ///
    /// Assigns the sequence, stores the ordered reply callbacks, marks the
    /// instance pre-prepared, and appends the proposal to the command log.
    /// On append failure the instance is abandoned and the callbacks are
    /// dropped. Returns `(seq, view)` for the caller to sign and broadcast
    /// the pre-prepare.
    pub fn record_proposal(
        &mut self,
        command: Vec<u8>,
        digest: Digest,
        replies: Vec<ReplySender>,
    ) -> Result<(u64, u64), HandleError> {
        self.sequence += 1;
        let seq = self.sequence;
        let view = self.view;

        self.pending_replies.insert(seq, replies);

        let state = self.requests.entry(seq).or_default();
        state.pre_prepared = true;
        state.pre_prepare = Some(PrePrepareArgs {
            view,
            seq,
            digest,
            command: command.clone(),
            // Own copy; the signature is produced per recipient at dispatch
            // and never verified locally.
            signature: Vec::new(),
        });

        if let Err(err) = self.log.append(view, &command) {
            warn!(seq, %err, "log append failed, abandoning proposal");
            self.requests.remove(&seq);
            self.pending_replies.remove(&seq);
            return Err(HandleError::Storage(err));
        }

        debug!(seq, bytes = command.len(), "proposal recorded");
        Ok((seq, view))
    }

    // ------------------------------------------------------------------
    // Inbound handlers
    // ------------------------------------------------------------------

    /// Accept a pre-prepare from the primary.
    ///
    /// The caller has already verified the signature against the primary
    /// of `args.view`. Idempotent: a sequence that is already pre-prepared
    /// is acknowledged without further effect.
    pub fn handle_pre_prepare(&mut self, args: PrePrepareArgs) -> Result<Vec<Action>, HandleError> {
        self.check_view(args.view)?;

        let seq = args.seq;
        let view = args.view;
        let digest = args.digest;

        if self
            .requests
            .get(&seq)
            .is_some_and(|state| state.pre_prepared)
        {
            return Ok(Vec::new());
        }

        // Durable before the sequence can contribute anything: a failed
        // append leaves this replica out of the instance entirely.
        self.log.append(view, &args.command)?;

        let state = self.requests.entry(seq).or_default();
        state.pre_prepared = true;
        state.pre_prepare = Some(args);
        // Accepting the pre-prepare is this replica's own prepare vote.
        state.prepare_from.insert(self.id);

        debug!(seq, "accepted pre-prepare");
        let mut actions = vec![Action::BroadcastPrepare { view, seq, digest }];
        actions.extend(self.advance(seq));
        Ok(actions)
    }

    /// Record a peer's prepare vote.
    pub fn handle_prepare(
        &mut self,
        seq: u64,
        view: u64,
        node: ReplicaId,
    ) -> Result<Vec<Action>, HandleError> {
        self.check_view(view)?;

        let state = self.requests.entry(seq).or_default();
        state.prepare_from.insert(node);
        debug!(seq, from = %node, votes = state.prepare_from.len(), "recorded prepare");

        Ok(self.advance(seq))
    }

    /// Record a peer's commit vote.
    pub fn handle_commit(
        &mut self,
        seq: u64,
        view: u64,
        node: ReplicaId,
    ) -> Result<Vec<Action>, HandleError> {
        self.check_view(view)?;

        let state = self.requests.entry(seq).or_default();
        state.commit_from.insert(node);
        debug!(seq, from = %node, votes = state.commit_from.len(), "recorded commit");

        Ok(self.advance(seq))
    }

    /// Aggregate an execution result reported for `seq` (primary only).
    pub fn handle_client_reply(&mut self, args: ClientReplyArgs) -> Result<(), HandleError> {
        if !self.is_primary() {
            return Err(HandleError::NotPrimary);
        }
        self.record_client_reply(args.seq, args.node, args.value);
        Ok(())
    }

    fn check_view(&self, view: u64) -> Result<(), HandleError> {
        if view != self.view {
            return Err(HandleError::ViewMismatch {
                expected: self.view,
                got: view,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase predicates
    // ------------------------------------------------------------------

    /// Evaluate the prepared and committed predicates for `seq`.
    ///
    /// Called whenever a message lands in the sequence's state, including
    /// the pre-prepare itself, so votes that arrived early are never
    /// stranded. Both transitions are one-way.
    fn advance(&mut self, seq: u64) -> Vec<Action> {
        let f = self.f();
        let mut actions = Vec::new();

        // Prepared: pre-prepared and 2f prepare votes (the primary's
        // pre-prepare is the implicit 2f+1st).
        if let Some(state) = self.requests.get_mut(&seq) {
            if !state.prepared && state.pre_prepared && state.prepare_from.len() >= 2 * f {
                state.prepared = true;
                state.commit_from.insert(self.id);
                let digest = state
                    .pre_prepare
                    .as_ref()
                    .expect("pre-prepared sequence stores its proposal")
                    .digest;
                info!(seq, quorum = 2 * f, "prepared, broadcasting commit");
                actions.push(Action::BroadcastCommit {
                    view: self.view,
                    seq,
                    digest,
                });
            }
        }

        // Committed: prepared and 2f+1 commit votes, own included.
        let ready = self.requests.get(&seq).is_some_and(|state| {
            !state.committed && state.prepared && state.commit_from.len() >= 2 * f + 1
        });
        if ready {
            let command = {
                let state = self
                    .requests
                    .get_mut(&seq)
                    .expect("sequence checked just above");
                state.committed = true;
                state
                    .pre_prepare
                    .as_ref()
                    .expect("prepared sequence stores its proposal")
                    .command
                    .clone()
            };
            info!(seq, quorum = 2 * f + 1, "committed, executing");
            actions.extend(self.execute(seq, &command));
        }

        actions
    }

    // ------------------------------------------------------------------
    // Execution and reply aggregation
    // ------------------------------------------------------------------

    /// Apply a committed batch to the state machine.
    ///
    /// A command blob that fails to decode as a batch is applied as a
    /// single raw command; this keeps a replica with a skewed encoder from
    /// stalling outright, at the cost of a logged anomaly.
    fn execute(&mut self, seq: u64, command: &[u8]) -> Vec<Action> {
        let commands = match decode_batch(command) {
            Ok(commands) => commands,
            Err(err) => {
                warn!(seq, %err, "committed blob is not a batch, applying raw bytes");
                vec![command.to_vec()]
            }
        };

        let results: Vec<String> = commands
            .iter()
            .map(|command| self.store.apply(command))
            .collect();
        let value = encode_results(&results);
        debug!(seq, commands = results.len(), "executed batch");

        if self.is_primary() {
            // The primary's own execution is one of the f+1 votes.
            self.record_client_reply(seq, self.id, value);
            Vec::new()
        } else {
            vec![Action::SendClientReply {
                to: self.primary(),
                args: ClientReplyArgs {
                    seq,
                    node: self.id,
                    value,
                },
            }]
        }
    }

    /// Record one execution result and, on f+1 matching values, resolve
    /// the client callbacks positionally.
    ///
    /// At least one of f+1 matching replies comes from an honest replica,
    /// so the matched value is the committed execution result.
    fn record_client_reply(&mut self, seq: u64, node: ReplicaId, value: Vec<u8>) {
        let required = self.f() + 1;

        let state = self.requests.entry(seq).or_default();
        if state.reply_sent {
            return;
        }
        state.replies.insert(node, value.clone());
        let matching = state.replies.values().filter(|v| **v == value).count();
        if matching < required {
            return;
        }
        state.reply_sent = true;

        info!(seq, matching, "reply quorum reached, answering clients");
        let senders = self.pending_replies.remove(&seq).unwrap_or_default();
        match decode_results(&value) {
            Ok(results) => {
                // Positional fan-out over min(callbacks, results); extras on
                // either side are dropped, which only happens on a protocol
                // bug.
                for (sender, result) in senders.into_iter().zip(results) {
                    let _ = sender.send(CommandResponse::ok(result));
                }
            }
            Err(err) => {
                // A quorum agreed on a value this replica cannot decode;
                // failing the callers beats forwarding a bogus result.
                warn!(seq, %err, "matched reply is not a result batch, failing callers");
                for sender in senders {
                    let _ = sender.send(CommandResponse::failed("result decoding failed"));
                }
            }
        }
    }
}
