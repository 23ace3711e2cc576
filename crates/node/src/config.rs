//! Cluster configuration.
//!
//! A line-delimited table mapping replica id to `host:port`:
//!
//! ```text
//! 1 127.0.0.1:6000
//! 2 127.0.0.1:6001
//! 3 127.0.0.1:6002
//! 4 127.0.0.1:6003
//! ```
//!
//! Blank lines and `#` comments are ignored. The cluster size is fixed at
//! boot; each replica listens on the address its own line declares.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use pbft_types::{primary_for_view, ReplicaId};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected `<id> <host:port>`, got {text:?}")]
    Malformed { line: usize, text: String },

    #[error("line {line}: duplicate replica id {id}")]
    DuplicateId { line: usize, id: ReplicaId },

    #[error("configuration lists no replicas")]
    Empty,

    #[error("replica {0} is not in the configuration")]
    UnknownReplica(ReplicaId),
}

/// Fixed peer address table for one cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    peers: BTreeMap<ReplicaId, String>,
}

impl ClusterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut peers = BTreeMap::new();
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let (Some(id), Some(addr), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(ConfigError::Malformed {
                    line,
                    text: trimmed.to_string(),
                });
            };
            let id = id
                .parse::<u32>()
                .map(ReplicaId)
                .map_err(|_| ConfigError::Malformed {
                    line,
                    text: trimmed.to_string(),
                })?;
            if peers.insert(id, addr.to_string()).is_some() {
                return Err(ConfigError::DuplicateId { line, id });
            }
        }
        if peers.is_empty() {
            return Err(ConfigError::Empty);
        }
        Ok(Self { peers })
    }

    /// Cluster size N.
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// Tolerated Byzantine faults: `(N - 1) / 3`.
    pub fn f(&self) -> usize {
        (self.size() - 1) / 3
    }

    pub fn addr_of(&self, id: ReplicaId) -> Result<&str, ConfigError> {
        self.peers
            .get(&id)
            .map(String::as_str)
            .ok_or(ConfigError::UnknownReplica(id))
    }

    /// All replica ids, ascending.
    pub fn replica_ids(&self) -> Vec<ReplicaId> {
        self.peers.keys().copied().collect()
    }

    /// Every replica except `id`, in id order.
    pub fn others(&self, id: ReplicaId) -> Vec<ReplicaId> {
        self.peers.keys().copied().filter(|&p| p != id).collect()
    }

    pub fn primary_for(&self, view: u64) -> ReplicaId {
        primary_for_view(view, self.size())
    }
}
