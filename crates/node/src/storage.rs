//! Write-ahead log.
//!
//! One append-only file per replica holding a record for every accepted
//! proposal. The log is a durability hint only: it is never read back and
//! never replayed.
//!
//! # Record Format
//!
//! ```text
//! [length: u32 le][crc32c(body): u32 le][body: bincode LogRecord]
//! ```
//!
//! # Modes
//!
//! - **Synchronous** (default): `append` returns only after the record is
//!   written and fsynced.
//! - **Asynchronous** (`--async-log`): `append` hands the record to a
//!   background writer thread and returns immediately; durability trails
//!   acceptance.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{mpsc, Mutex};

use serde::Serialize;
use tracing::{debug, warn};

use pbft_consensus::{CommandLog, WalError};

#[derive(Serialize)]
struct LogRecord<'a> {
    view: u64,
    command: &'a [u8],
}

enum Mode {
    Sync(Mutex<File>),
    Async(mpsc::Sender<Vec<u8>>),
}

/// Append-only log file with optional asynchronous fsync discipline.
pub struct Wal {
    mode: Mode,
}

impl Wal {
    /// Open (creating if needed) the log at `path`.
    pub fn open(path: &Path, async_mode: bool) -> Result<Self, WalError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!(path = %path.display(), async_mode, "opened write-ahead log");

        let mode = if async_mode {
            let (tx, rx) = mpsc::channel::<Vec<u8>>();
            std::thread::spawn(move || {
                while let Ok(record) = rx.recv() {
                    if let Err(err) = file.write_all(&record) {
                        warn!(%err, "background log write failed");
                        return;
                    }
                }
                // Sender dropped; flush what we have and exit.
                let _ = file.sync_data();
            });
            Mode::Async(tx)
        } else {
            Mode::Sync(Mutex::new(file))
        };
        Ok(Self { mode })
    }

    fn encode(view: u64, command: &[u8]) -> Result<Vec<u8>, WalError> {
        let body = bincode::serialize(&LogRecord { view, command })
            .map_err(|err| WalError::Io(std::io::Error::other(err)))?;
        let mut record = Vec::with_capacity(8 + body.len());
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(&crc32c::crc32c(&body).to_le_bytes());
        record.extend_from_slice(&body);
        Ok(record)
    }
}

impl CommandLog for Wal {
    fn append(&self, view: u64, command: &[u8]) -> Result<(), WalError> {
        let record = Self::encode(view, command)?;
        match &self.mode {
            Mode::Sync(file) => {
                let mut file = file.lock().map_err(|_| WalError::Closed)?;
                file.write_all(&record)?;
                file.sync_data()?;
                Ok(())
            }
            Mode::Async(tx) => tx.send(record).map_err(|_| WalError::Closed),
        }
    }
}
