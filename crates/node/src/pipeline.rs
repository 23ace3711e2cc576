//! Client-request batching pipeline.
//!
//! A single consumer drains the bounded submission channel. A batch
//! flushes as soon as it reaches `write_batch_size`; otherwise a one-shot
//! linger timer arms on the first queued request and flushes whatever has
//! accumulated when it fires. Reads ride through consensus like writes so
//! read-your-writes holds without a separate read path.
//!
//! Producers block when the channel is full; the pipeline never drops a
//! request on the floor.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use pbft_consensus::CommandResponse;

use crate::node::Node;

/// How long the first request of a batch may linger before flushing.
pub(crate) const WRITE_LINGER: Duration = Duration::from_millis(15);

/// Submission queue depth; producers block on a full queue.
pub(crate) const SUBMISSION_QUEUE_DEPTH: usize = 5000;

/// One client command and the callback that receives its outcome.
#[derive(Debug)]
pub struct Submission {
    pub command: Vec<u8>,
    pub reply: oneshot::Sender<CommandResponse>,
}

/// Consumer loop: batch by size or linger, then hand to the proposer.
pub(crate) async fn run(
    node: Node,
    mut submissions: mpsc::Receiver<Submission>,
    write_batch_size: usize,
) {
    let write_batch_size = write_batch_size.max(1);
    let mut pending: Vec<Submission> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            received = submissions.recv() => match received {
                Some(submission) => {
                    pending.push(submission);
                    if pending.len() >= write_batch_size {
                        debug!(batch = pending.len(), "flushing full batch");
                        node.propose(std::mem::take(&mut pending)).await;
                        deadline = None;
                    } else if deadline.is_none() {
                        deadline = Some(Instant::now() + WRITE_LINGER);
                    }
                }
                None => {
                    if !pending.is_empty() {
                        node.propose(std::mem::take(&mut pending)).await;
                    }
                    return;
                }
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() =>
            {
                debug!(batch = pending.len(), "linger expired, flushing batch");
                node.propose(std::mem::take(&mut pending)).await;
                deadline = None;
            }
        }
    }
}
