//! Replica identity and view arithmetic.

use serde::{Deserialize, Serialize};

/// 1-based replica identifier, as listed in the cluster configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub u32);

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary for a view over a cluster of `n` replicas: `(view mod n) + 1`.
///
/// Ids are 1-based, so view 0 maps to replica 1. The view is pinned at 0 in
/// this core (no view change), but every message still carries it, and
/// pre-prepare verification derives the expected signer from the message's
/// own view field.
pub fn primary_for_view(view: u64, n: usize) -> ReplicaId {
    ReplicaId((view % n as u64) as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_rotates_through_cluster() {
        assert_eq!(primary_for_view(0, 4), ReplicaId(1));
        assert_eq!(primary_for_view(1, 4), ReplicaId(2));
        assert_eq!(primary_for_view(3, 4), ReplicaId(4));
        assert_eq!(primary_for_view(4, 4), ReplicaId(1));
    }
}
