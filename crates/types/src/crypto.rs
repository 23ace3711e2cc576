//! Message authentication.
//!
//! Two schemes, selected at boot and uniform across the cluster:
//!
//! - **Ed25519**: each replica signs with its own key and verifies against
//!   the public keys of its peers. One signature is valid for every
//!   recipient.
//! - **MAC**: HMAC-SHA256 with a 32-byte key shared per unordered replica
//!   pair, so `key(i, j) == key(j, i)`. Tags are bound to a recipient:
//!   broadcast dispatch signs once per peer with the pairwise key.
//!
//! Key material is derived deterministically from replica ids so a cluster
//! can be reproduced from its configuration alone. Production deployments
//! would substitute out-of-band key distribution; the `sign`/`verify`
//! surface does not change.

use std::collections::HashMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::Sha256;
use thiserror::Error;

use crate::identifiers::ReplicaId;

type HmacSha256 = Hmac<Sha256>;

/// Authentication scheme for protocol messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoScheme {
    Ed25519,
    Mac,
}

/// Errors from signing or verification.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("bad signature from replica {0}")]
    BadSignature(ReplicaId),

    #[error("no key material for replica {0}")]
    UnknownPeer(ReplicaId),
}

/// Signing/verification capability for one replica.
///
/// No other component inspects key material; the engine and RPC layer see
/// only `sign` and `verify`.
pub enum Authenticator {
    Ed25519 {
        key: SigningKey,
        peers: HashMap<ReplicaId, VerifyingKey>,
    },
    Mac {
        keys: HashMap<ReplicaId, [u8; 32]>,
    },
}

impl Authenticator {
    /// Build the authenticator for `id` over the given cluster membership.
    pub fn derive(scheme: CryptoScheme, id: ReplicaId, replicas: &[ReplicaId]) -> Self {
        match scheme {
            CryptoScheme::Ed25519 => Self::Ed25519 {
                key: ed25519_key(id),
                peers: replicas
                    .iter()
                    .map(|&peer| (peer, ed25519_key(peer).verifying_key()))
                    .collect(),
            },
            CryptoScheme::Mac => Self::Mac {
                keys: replicas
                    .iter()
                    .map(|&peer| (peer, pairwise_mac_key(id, peer)))
                    .collect(),
            },
        }
    }

    /// Sign `data` for transmission to `to`.
    ///
    /// Ed25519 ignores the recipient; MAC tags use the pairwise key.
    pub fn sign(&self, to: ReplicaId, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        match self {
            Self::Ed25519 { key, .. } => Ok(key.sign(data).to_bytes().to_vec()),
            Self::Mac { keys } => {
                let key = keys.get(&to).ok_or(AuthError::UnknownPeer(to))?;
                let mut mac = HmacSha256::new_from_slice(key)
                    .expect("hmac-sha256 accepts keys of any length");
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    /// Verify that `signature` over `data` was produced by `from`.
    ///
    /// MAC comparison is constant-time.
    pub fn verify(&self, from: ReplicaId, data: &[u8], signature: &[u8]) -> Result<(), AuthError> {
        match self {
            Self::Ed25519 { peers, .. } => {
                let key = peers.get(&from).ok_or(AuthError::UnknownPeer(from))?;
                let signature =
                    Signature::from_slice(signature).map_err(|_| AuthError::BadSignature(from))?;
                key.verify(data, &signature)
                    .map_err(|_| AuthError::BadSignature(from))
            }
            Self::Mac { keys } => {
                let key = keys.get(&from).ok_or(AuthError::UnknownPeer(from))?;
                let mut mac = HmacSha256::new_from_slice(key)
                    .expect("hmac-sha256 accepts keys of any length");
                mac.update(data);
                mac.verify_slice(signature)
                    .map_err(|_| AuthError::BadSignature(from))
            }
        }
    }
}

/// Deterministic Ed25519 key for a replica id.
fn ed25519_key(id: ReplicaId) -> SigningKey {
    let mut rng = ChaCha8Rng::seed_from_u64(id.0 as u64 + 1000);
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed)
}

/// Deterministic shared key for an unordered replica pair.
fn pairwise_mac_key(a: ReplicaId, b: ReplicaId) -> [u8; 32] {
    let (lo, hi) = if a.0 <= b.0 { (a.0, b.0) } else { (b.0, a.0) };
    let mut rng = ChaCha8Rng::seed_from_u64(lo as u64 * 1000 + hi as u64);
    let mut key = [0u8; 32];
    rng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> Vec<ReplicaId> {
        (1..=4).map(ReplicaId).collect()
    }

    #[test]
    fn ed25519_signature_verifies_for_every_recipient() {
        let signer = Authenticator::derive(CryptoScheme::Ed25519, ReplicaId(1), &cluster());
        let verifier = Authenticator::derive(CryptoScheme::Ed25519, ReplicaId(3), &cluster());

        let sig = signer.sign(ReplicaId(3), b"0:1:abc").unwrap();
        assert_eq!(sig.len(), 64);
        verifier.verify(ReplicaId(1), b"0:1:abc", &sig).unwrap();
    }

    #[test]
    fn ed25519_rejects_tampered_signature() {
        let signer = Authenticator::derive(CryptoScheme::Ed25519, ReplicaId(1), &cluster());
        let verifier = Authenticator::derive(CryptoScheme::Ed25519, ReplicaId(2), &cluster());

        let mut sig = signer.sign(ReplicaId(2), b"payload").unwrap();
        sig[0] ^= 0x01;
        assert!(matches!(
            verifier.verify(ReplicaId(1), b"payload", &sig),
            Err(AuthError::BadSignature(ReplicaId(1)))
        ));
    }

    #[test]
    fn ed25519_rejects_wrong_claimed_sender() {
        let signer = Authenticator::derive(CryptoScheme::Ed25519, ReplicaId(1), &cluster());
        let verifier = Authenticator::derive(CryptoScheme::Ed25519, ReplicaId(2), &cluster());

        let sig = signer.sign(ReplicaId(2), b"payload").unwrap();
        assert!(verifier.verify(ReplicaId(4), b"payload", &sig).is_err());
    }

    #[test]
    fn mac_tag_verifies_across_the_pair() {
        let one = Authenticator::derive(CryptoScheme::Mac, ReplicaId(1), &cluster());
        let two = Authenticator::derive(CryptoScheme::Mac, ReplicaId(2), &cluster());

        // key(1,2) == key(2,1): a tag 1 produces for 2 verifies at 2 as
        // coming from 1, and vice versa.
        let tag = one.sign(ReplicaId(2), b"0:5:d:1").unwrap();
        two.verify(ReplicaId(1), b"0:5:d:1", &tag).unwrap();

        let tag = two.sign(ReplicaId(1), b"0:5:d:2").unwrap();
        one.verify(ReplicaId(2), b"0:5:d:2", &tag).unwrap();
    }

    #[test]
    fn mac_tag_is_bound_to_the_pair() {
        let one = Authenticator::derive(CryptoScheme::Mac, ReplicaId(1), &cluster());
        let three = Authenticator::derive(CryptoScheme::Mac, ReplicaId(3), &cluster());

        // A tag produced for replica 2 must not verify at replica 3.
        let tag = one.sign(ReplicaId(2), b"payload").unwrap();
        assert!(three.verify(ReplicaId(1), b"payload", &tag).is_err());
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = Authenticator::derive(CryptoScheme::Ed25519, ReplicaId(2), &cluster());
        let b = Authenticator::derive(CryptoScheme::Ed25519, ReplicaId(2), &cluster());
        assert_eq!(
            a.sign(ReplicaId(1), b"x").unwrap(),
            b.sign(ReplicaId(1), b"x").unwrap()
        );
    }
}
