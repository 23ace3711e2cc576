//! Replica runtime: the engine behind its lock, plus everything that
//! signs, dispatches, and supervises.
//!
//! # Lock discipline
//!
//! Inbound signature verification needs nothing but the message (the
//! expected signer is derived from the message's own fields), so it runs
//! before the engine lock is taken. Handlers then hold the write lock for
//! validation and state mutation only; the outbound messages implied by a
//! transition are signed and sent from detached tasks after the lock is
//! released. The checksum inspection path takes the shared read lock.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pbft_consensus::{Action, CommandResponse, HandleError, ReplicaState, ReplySender, WalError};
use pbft_types::{
    commit_payload, method, pre_prepare_payload, prepare_payload, primary_for_view,
    Authenticator, ClientReplyArgs, ClientReplyReply, CommitArgs, CommitReply, CryptoScheme,
    Digest, GetStateChecksumReply, PrePrepareArgs, PrePrepareReply, PrepareArgs, PrepareReply,
    ReplicaId,
};

use crate::config::{ClusterConfig, ConfigError};
use crate::pipeline::{self, Submission, SUBMISSION_QUEUE_DEPTH};
use crate::rpc::{self, ConnectionCache};
use crate::storage::Wal;
use crate::workload::{self, WorkloadKind};

/// Boot parameters, mirroring the `pbft start` flags.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub id: ReplicaId,
    pub conf_path: PathBuf,
    pub write_batch_size: usize,
    /// Unused by any read fast path (reads ride through consensus); kept
    /// because the RESULT line reports it.
    pub read_batch_size: usize,
    /// Load-driver worker count; 0 disables the driver.
    pub workers: usize,
    pub workload: WorkloadKind,
    pub crypto: CryptoScheme,
    pub async_log: bool,
    /// Place the write-ahead log on tmpfs.
    pub in_memory: bool,
    /// Override the log directory (tests); defaults to the working
    /// directory, or `/dev/shm` with `in_memory`.
    pub data_dir: Option<PathBuf>,
}

impl NodeOptions {
    pub fn new(id: ReplicaId, conf_path: PathBuf) -> Self {
        Self {
            id,
            conf_path,
            write_batch_size: 128,
            read_batch_size: 128,
            workers: 256,
            workload: WorkloadKind::YcsbA,
            crypto: CryptoScheme::Ed25519,
            async_log: false,
            in_memory: false,
            data_dir: None,
        }
    }
}

/// Fatal boot errors; everything past boot is handled in place.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open write-ahead log: {0}")]
    Wal(#[from] WalError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

struct NodeInner {
    id: ReplicaId,
    cluster: ClusterConfig,
    auth: Authenticator,
    state: RwLock<ReplicaState>,
    peers: ConnectionCache,
}

/// Capability handle to one replica's runtime: the engine behind its lock
/// plus the authenticator and connection cache the spawned tasks share.
/// Cloning is cheap; every task holds its own handle.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub(crate) fn new(
        id: ReplicaId,
        cluster: ClusterConfig,
        auth: Authenticator,
        state: ReplicaState,
    ) -> Self {
        let peers = ConnectionCache::new(&cluster);
        Self {
            inner: Arc::new(NodeInner {
                id,
                cluster,
                auth,
                state: RwLock::new(state),
                peers,
            }),
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.inner.id
    }

    // ------------------------------------------------------------------
    // Inbound handlers
    // ------------------------------------------------------------------

    pub(crate) async fn on_pre_prepare(&self, args: PrePrepareArgs) -> PrePrepareReply {
        // The pre-prepare is signed by the primary of the view it names.
        let signer = primary_for_view(args.view, self.inner.cluster.size());
        let payload = pre_prepare_payload(args.view, args.seq, &args.digest);
        if let Err(err) = self.inner.auth.verify(signer, &payload, &args.signature) {
            warn!(seq = args.seq, %err, "dropping pre-prepare");
            return PrePrepareReply { success: false };
        }

        let outcome = self.inner.state.write().await.handle_pre_prepare(args);
        let success = self.finish("pre-prepare", outcome);
        PrePrepareReply { success }
    }

    pub(crate) async fn on_prepare(&self, args: PrepareArgs) -> PrepareReply {
        let payload = prepare_payload(args.view, args.seq, &args.digest, args.node);
        if let Err(err) = self.inner.auth.verify(args.node, &payload, &args.signature) {
            warn!(seq = args.seq, from = %args.node, %err, "dropping prepare");
            return PrepareReply { success: false };
        }

        let outcome = self
            .inner
            .state
            .write()
            .await
            .handle_prepare(args.seq, args.view, args.node);
        let success = self.finish("prepare", outcome);
        PrepareReply { success }
    }

    pub(crate) async fn on_commit(&self, args: CommitArgs) -> CommitReply {
        let payload = commit_payload(args.view, args.seq, &args.digest, args.node);
        if let Err(err) = self.inner.auth.verify(args.node, &payload, &args.signature) {
            warn!(seq = args.seq, from = %args.node, %err, "dropping commit");
            return CommitReply { success: false };
        }

        let outcome = self
            .inner
            .state
            .write()
            .await
            .handle_commit(args.seq, args.view, args.node);
        let success = self.finish("commit", outcome);
        CommitReply { success }
    }

    pub(crate) async fn on_client_reply(&self, args: ClientReplyArgs) -> ClientReplyReply {
        let outcome = self.inner.state.write().await.handle_client_reply(args);
        match outcome {
            Ok(()) => ClientReplyReply { success: true },
            Err(err) => {
                debug!(%err, "ignoring client reply");
                ClientReplyReply { success: false }
            }
        }
    }

    pub(crate) async fn on_state_checksum(&self) -> GetStateChecksumReply {
        let checksum = self.inner.state.read().await.state_checksum();
        GetStateChecksumReply {
            checksum: checksum.checksum,
            count: checksum.count,
        }
    }

    /// Log a handler outcome, dispatch its actions, and reduce it to the
    /// wire-level `success` flag.
    fn finish(&self, kind: &'static str, outcome: Result<Vec<Action>, HandleError>) -> bool {
        match outcome {
            Ok(actions) => {
                self.dispatch(actions);
                true
            }
            Err(err @ HandleError::ViewMismatch { .. }) => {
                debug!(kind, %err, "dropping message");
                false
            }
            Err(err) => {
                warn!(kind, %err, "handler aborted");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Primary path
    // ------------------------------------------------------------------

    /// Propose one batch: assign a sequence under the lock, then broadcast
    /// the signed pre-prepare from detached tasks.
    pub(crate) async fn propose(&self, batch: Vec<Submission>) {
        if batch.is_empty() {
            return;
        }
        let (commands, senders): (Vec<Vec<u8>>, Vec<ReplySender>) = batch
            .into_iter()
            .map(|submission| (submission.command, submission.reply))
            .unzip();
        let encoded = pbft_types::encode_batch(&commands);
        let digest = Digest::of(&encoded);

        let recorded = {
            let mut state = self.inner.state.write().await;
            if !state.is_primary() {
                drop(state);
                for sender in senders {
                    let _ = sender.send(CommandResponse::failed("not the primary"));
                }
                return;
            }
            state.record_proposal(encoded.clone(), digest, senders)
        };
        let (seq, view) = match recorded {
            Ok(assigned) => assigned,
            // Callbacks were dropped with the abandoned proposal.
            Err(err) => {
                warn!(%err, "proposal failed");
                return;
            }
        };

        debug!(seq, commands = commands.len(), "broadcasting pre-prepare");
        for peer in self.inner.cluster.others(self.inner.id) {
            let node = self.clone();
            let command = encoded.clone();
            tokio::spawn(async move {
                let payload = pre_prepare_payload(view, seq, &digest);
                let Ok(signature) = node.inner.auth.sign(peer, &payload) else {
                    return;
                };
                let args = PrePrepareArgs {
                    view,
                    seq,
                    digest,
                    command,
                    signature,
                };
                if let Err(err) = node
                    .inner
                    .peers
                    .call::<_, PrePrepareReply>(peer, method::PRE_PREPARE, &args)
                    .await
                {
                    debug!(%peer, seq, %err, "pre-prepare send failed");
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Outbound dispatch
    // ------------------------------------------------------------------

    /// Fire-and-forget execution of handler actions, one task per peer.
    fn dispatch(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::BroadcastPrepare { view, seq, digest } => {
                    for peer in self.inner.cluster.others(self.inner.id) {
                        let node = self.clone();
                        tokio::spawn(async move {
                            let own = node.inner.id;
                            let payload = prepare_payload(view, seq, &digest, own);
                            let Ok(signature) = node.inner.auth.sign(peer, &payload) else {
                                return;
                            };
                            let args = PrepareArgs {
                                view,
                                seq,
                                digest,
                                node: own,
                                signature,
                            };
                            if let Err(err) = node
                                .inner
                                .peers
                                .call::<_, PrepareReply>(peer, method::PREPARE, &args)
                                .await
                            {
                                debug!(%peer, seq, %err, "prepare send failed");
                            }
                        });
                    }
                }
                Action::BroadcastCommit { view, seq, digest } => {
                    for peer in self.inner.cluster.others(self.inner.id) {
                        let node = self.clone();
                        tokio::spawn(async move {
                            let own = node.inner.id;
                            let payload = commit_payload(view, seq, &digest, own);
                            let Ok(signature) = node.inner.auth.sign(peer, &payload) else {
                                return;
                            };
                            let args = CommitArgs {
                                view,
                                seq,
                                digest,
                                node: own,
                                signature,
                            };
                            if let Err(err) = node
                                .inner
                                .peers
                                .call::<_, CommitReply>(peer, method::COMMIT, &args)
                                .await
                            {
                                debug!(%peer, seq, %err, "commit send failed");
                            }
                        });
                    }
                }
                Action::SendClientReply { to, args } => {
                    let node = self.clone();
                    tokio::spawn(async move {
                        let seq = args.seq;
                        if let Err(err) = node
                            .inner
                            .peers
                            .call::<_, ClientReplyReply>(to, method::CLIENT_REPLY, &args)
                            .await
                        {
                            debug!(%to, seq, %err, "client reply send failed");
                        }
                    });
                }
            }
        }
    }
}

/// Running replica: keeps the spawned tasks alive and accepts client
/// submissions.
pub struct NodeHandle {
    node: Node,
    submissions: mpsc::Sender<Submission>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// Submit one command and wait for its consensus-backed reply.
    pub async fn submit(&self, command: impl Into<Vec<u8>>) -> CommandResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        let submission = Submission {
            command: command.into(),
            reply: reply_tx,
        };
        if self.submissions.send(submission).await.is_err() {
            return CommandResponse::failed("pipeline closed");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| CommandResponse::failed("request dropped"))
    }

    pub fn id(&self) -> ReplicaId {
        self.node.id()
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Boot a replica: parse the peer table, derive keys, open storage, bind
/// the RPC listener, and spawn the pipeline (and, on the primary, the
/// load driver). Peers are dialed lazily on first send.
pub async fn start(options: NodeOptions) -> Result<NodeHandle, StartError> {
    let cluster = ClusterConfig::load(&options.conf_path)?;
    let listen_addr = cluster.addr_of(options.id)?.to_string();

    let auth = Authenticator::derive(options.crypto, options.id, &cluster.replica_ids());

    let wal_dir = options.data_dir.clone().unwrap_or_else(|| {
        if options.in_memory {
            PathBuf::from("/dev/shm")
        } else {
            PathBuf::from(".")
        }
    });
    let wal_path = wal_dir.join(format!("node_{}.wal", options.id));
    let wal = Wal::open(&wal_path, options.async_log)?;

    let state = ReplicaState::new(options.id, cluster.size(), Box::new(wal));
    let is_primary = cluster.primary_for(state.view()) == options.id;
    let node = Node::new(options.id, cluster.clone(), auth, state);

    let listener = TcpListener::bind(&listen_addr)
        .await
        .map_err(|source| StartError::Bind {
            addr: listen_addr.clone(),
            source,
        })?;
    info!(
        id = %options.id,
        addr = %listen_addr,
        cluster_size = cluster.size(),
        f = cluster.f(),
        primary = is_primary,
        "replica starting"
    );

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(rpc::serve(listener, node.clone())));

    let (submissions, inbox) = mpsc::channel(SUBMISSION_QUEUE_DEPTH);
    tasks.push(tokio::spawn(pipeline::run(
        node.clone(),
        inbox,
        options.write_batch_size,
    )));

    if is_primary && options.workers > 0 {
        let experiment = workload::Experiment {
            kind: options.workload,
            workers: options.workers,
            read_batch_size: options.read_batch_size,
            write_batch_size: options.write_batch_size,
        };
        tasks.push(tokio::spawn(workload::run(submissions.clone(), experiment)));
    }

    Ok(NodeHandle {
        node,
        submissions,
        tasks,
    })
}
