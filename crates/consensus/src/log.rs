//! Command log seam.
//!
//! The engine records every accepted proposal before contributing to its
//! phase; the log is the engine's only I/O dependency and is write-only in
//! this design (nothing is ever read back).

use std::sync::Mutex;

use thiserror::Error;

/// Errors from appending to the write-ahead log.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("append failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("write-ahead log closed")]
    Closed,
}

/// Append-only record of accepted proposals.
///
/// An append failure aborts the current phase transition on this replica:
/// it will neither broadcast nor apply the affected sequence.
pub trait CommandLog: Send + Sync {
    fn append(&self, view: u64, command: &[u8]) -> Result<(), WalError>;
}

/// In-memory log for tests and benchmarks.
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of appended entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CommandLog for MemoryLog {
    fn append(&self, view: u64, command: &[u8]) -> Result<(), WalError> {
        let mut entries = self.entries.lock().map_err(|_| WalError::Closed)?;
        entries.push((view, command.to_vec()));
        Ok(())
    }
}
