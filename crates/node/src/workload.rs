//! Synthetic YCSB-style load driver.
//!
//! Runs on the primary only. After a start delay (backups need time to
//! come up and dial), a fixed pool of workers submits commands through the
//! request pipeline for a fixed duration, each waiting for its reply
//! before issuing the next. The aggregate throughput and mean latency are
//! printed as a `RESULT:` line for harnesses to scrape.

use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::pipeline::Submission;

/// Exclusive upper bound for generated values (`value0` .. `value1499`).
const VALUE_MAX: u32 = 1500;

/// Delay before the experiment starts.
const CLIENT_START_DELAY: Duration = Duration::from_millis(4000);

/// Length of the measured experiment window.
const EXPERIMENT_DURATION: Duration = Duration::from_millis(10_000);

/// Keys the workload draws from.
const KEYS: [&str; 6] = ["x", "y", "z", "a", "b", "c"];

/// Workload mix, named after its YCSB profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// 50% writes.
    YcsbA,
    /// 5% writes.
    YcsbB,
    /// Read-only.
    YcsbC,
}

impl WorkloadKind {
    pub fn write_ratio(self) -> u32 {
        match self {
            Self::YcsbA => 50,
            Self::YcsbB => 5,
            Self::YcsbC => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::YcsbA => "ycsb-a",
            Self::YcsbB => "ycsb-b",
            Self::YcsbC => "ycsb-c",
        }
    }
}

#[derive(Debug, Default)]
struct WorkerReport {
    commands: u64,
    total_latency: Duration,
}

/// Experiment parameters echoed into the RESULT line.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Experiment {
    pub kind: WorkloadKind,
    pub workers: usize,
    pub read_batch_size: usize,
    pub write_batch_size: usize,
}

/// Drive the experiment and print the RESULT line.
pub(crate) async fn run(submissions: mpsc::Sender<Submission>, experiment: Experiment) {
    tokio::time::sleep(CLIENT_START_DELAY).await;
    info!(
        workload = experiment.kind.name(),
        workers = experiment.workers,
        "load driver starting"
    );

    let deadline = Instant::now() + EXPERIMENT_DURATION;
    let mut workers = JoinSet::new();
    for _ in 0..experiment.workers {
        let submissions = submissions.clone();
        workers.spawn(worker(submissions, experiment.kind.write_ratio(), deadline));
    }

    let mut commands = 0u64;
    let mut total_latency = Duration::ZERO;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(report) => {
                commands += report.commands;
                total_latency += report.total_latency;
            }
            Err(err) => warn!(%err, "worker task failed"),
        }
    }

    let throughput = commands as f64 / EXPERIMENT_DURATION.as_secs_f64();
    let avg_latency_ms = if commands > 0 {
        total_latency.as_secs_f64() * 1000.0 / commands as f64
    } else {
        0.0
    };
    info!(commands, throughput, avg_latency_ms, "load driver finished");

    println!(
        "RESULT:{},{},{},{},{:.2},{:.2}",
        experiment.kind.name(),
        experiment.read_batch_size,
        experiment.write_batch_size,
        experiment.workers,
        throughput,
        avg_latency_ms
    );
}

/// One closed-loop worker: submit, wait for the reply, repeat.
async fn worker(
    submissions: mpsc::Sender<Submission>,
    write_ratio: u32,
    deadline: Instant,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    while Instant::now() < deadline {
        let command = ycsb_command(write_ratio);
        let (reply_tx, reply_rx) = oneshot::channel();
        let started = Instant::now();
        if submissions
            .send(Submission {
                command,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            break;
        }
        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(Ok(response)) if response.success => {
                report.commands += 1;
                report.total_latency += started.elapsed();
            }
            Ok(Ok(response)) => {
                warn!(value = %response.value, "command failed, stopping worker");
                break;
            }
            // Abandon the in-flight command at the deadline, or on a
            // dropped callback (proposal aborted).
            Ok(Err(_)) | Err(_) => break,
        }
    }
    report
}

fn ycsb_command(write_ratio: u32) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let key = KEYS[rng.gen_range(0..KEYS.len())];
    if rng.gen_range(0..100) < write_ratio {
        format!("SET {key} value{}", rng.gen_range(0..VALUE_MAX)).into_bytes()
    } else {
        format!("GET {key}").into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_mix_never_writes() {
        for _ in 0..200 {
            let command = ycsb_command(WorkloadKind::YcsbC.write_ratio());
            assert!(command.starts_with(b"GET "));
        }
    }

    #[test]
    fn write_heavy_mix_produces_both_verbs() {
        let commands: Vec<_> = (0..200).map(|_| ycsb_command(50)).collect();
        assert!(commands.iter().any(|c| c.starts_with(b"SET ")));
        assert!(commands.iter().any(|c| c.starts_with(b"GET ")));
    }
}
