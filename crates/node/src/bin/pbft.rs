//! PBFT replica entry point.
//!
//! ```bash
//! pbft start --id 1 --conf cluster.conf --crypto ed25519 --workload ycsb-a
//! ```
//!
//! Runs until interrupted. The primary (replica 1 at view 0) drives the
//! synthetic workload and prints a `RESULT:` line when the experiment
//! window closes; backups participate in consensus and idle otherwise.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pbft_node::{start, NodeOptions};
use pbft_node::workload::WorkloadKind;
use pbft_types::{CryptoScheme, ReplicaId};

#[derive(Parser, Debug)]
#[command(name = "pbft", about = "PBFT replicated key-value store", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a replica.
    Start(StartArgs),
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Replica id (1-based, as listed in the configuration file).
    #[arg(long)]
    id: u32,

    /// Path to the cluster configuration file.
    #[arg(long)]
    conf: PathBuf,

    /// Requests per consensus batch before an immediate flush.
    #[arg(long, default_value_t = 128)]
    write_batch_size: usize,

    /// Read batch size (reported in RESULT; reads go through consensus).
    #[arg(long, default_value_t = 128)]
    read_batch_size: usize,

    /// Concurrent load-driver workers (primary only; 0 disables).
    #[arg(long, default_value_t = 256)]
    workers: usize,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Buffer log appends in a background writer instead of fsyncing each.
    #[arg(long)]
    async_log: bool,

    /// Keep the write-ahead log on tmpfs (/dev/shm).
    #[arg(long)]
    in_memory: bool,

    /// Workload mix for the load driver.
    #[arg(long, value_enum, default_value = "ycsb-a")]
    workload: WorkloadArg,

    /// Message authentication scheme (cluster-wide).
    #[arg(long, value_enum, default_value = "ed25519")]
    crypto: CryptoArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WorkloadArg {
    YcsbA,
    YcsbB,
    YcsbC,
}

impl From<WorkloadArg> for WorkloadKind {
    fn from(arg: WorkloadArg) -> Self {
        match arg {
            WorkloadArg::YcsbA => WorkloadKind::YcsbA,
            WorkloadArg::YcsbB => WorkloadKind::YcsbB,
            WorkloadArg::YcsbC => WorkloadKind::YcsbC,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CryptoArg {
    Ed25519,
    Mac,
}

impl From<CryptoArg> for CryptoScheme {
    fn from(arg: CryptoArg) -> Self {
        match arg {
            CryptoArg::Ed25519 => CryptoScheme::Ed25519,
            CryptoArg::Mac => CryptoScheme::Mac,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Start(args) => run(args).await,
    }
}

async fn run(args: StartArgs) -> Result<()> {
    let default_directive = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    let options = NodeOptions {
        id: ReplicaId(args.id),
        conf_path: args.conf,
        write_batch_size: args.write_batch_size,
        read_batch_size: args.read_batch_size,
        workers: args.workers,
        workload: args.workload.into(),
        crypto: args.crypto.into(),
        async_log: args.async_log,
        in_memory: args.in_memory,
        data_dir: None,
    };

    let _handle = start(options).await.context("failed to start replica")?;

    tokio::signal::ctrl_c().await?;
    info!("interrupted, shutting down");
    Ok(())
}
