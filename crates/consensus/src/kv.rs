//! Deterministic key-value state machine.
//!
//! Commands are whitespace-tokenized text over string keys and values.
//! Determinism is a hard requirement: identical command sequences on
//! correct replicas must yield identical state and reply sequences, so the
//! reply strings below are part of the protocol surface.

use std::collections::BTreeMap;

use sha2::{Digest as _, Sha256};

/// State checksum for cross-replica consistency checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChecksum {
    /// Lowercase hex SHA-256 over `"{k}:{v};"` per entry, keys in
    /// lexicographic order.
    pub checksum: String,
    pub count: u64,
}

/// In-memory string map answering `SET` / `GET` / `DELETE`.
///
/// Backed by a `BTreeMap` so checksum enumeration gets lexicographic key
/// order for free.
#[derive(Debug, Default)]
pub struct KvStore {
    entries: BTreeMap<String, String>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one command and produce its reply string.
    ///
    /// Tokenization splits on ASCII space only, ignoring runs. Unknown or
    /// malformed commands are reflected as reply strings, never as errors.
    pub fn apply(&mut self, command: &[u8]) -> String {
        let text = String::from_utf8_lossy(command);
        let parts: Vec<&str> = text.split(' ').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [] => "Invalid Command".to_string(),
            ["SET", key, value] => {
                self.entries.insert((*key).to_string(), (*value).to_string());
                "OK".to_string()
            }
            ["SET", ..] => "Invalid SET".to_string(),
            ["GET", key] => self
                .entries
                .get(*key)
                .cloned()
                .unwrap_or_else(|| "Key not found".to_string()),
            ["GET", ..] => "Invalid GET".to_string(),
            ["DELETE", key] => {
                self.entries.remove(*key);
                "OK".to_string()
            }
            ["DELETE", ..] => "Invalid DELETE".to_string(),
            _ => "Unknown command".to_string(),
        }
    }

    /// Checksum over the full state, for the inspection RPC and tests.
    pub fn checksum(&self) -> StateChecksum {
        let mut hasher = Sha256::new();
        for (key, value) in &self.entries {
            hasher.update(format!("{key}:{value};").as_bytes());
        }
        StateChecksum {
            checksum: hex::encode(hasher.finalize()),
            count: self.entries.len() as u64,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
