//! Foundation types for the PBFT key-value store.
//!
//! This crate provides the types shared by the consensus engine and the
//! node runtime:
//!
//! - **Identifiers**: replica ids and the view/primary mapping
//! - **Digests**: SHA-256 batch digests, rendered as lowercase hex
//! - **Wire codec**: the length-prefixed batch encoding for commands and
//!   result strings
//! - **Protocol messages**: argument/reply records for the five RPC methods
//! - **Signing payloads**: the canonical byte strings covered by message
//!   authenticators
//! - **Authenticator**: Ed25519 signatures or pairwise HMAC-SHA256 tags
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crate, making it the foundation layer.
//! Nothing in here performs I/O.

mod batch;
mod crypto;
mod digest;
mod identifiers;
mod message;
mod signing;

pub use batch::{decode_batch, decode_results, encode_batch, encode_results, CodecError};
pub use crypto::{AuthError, Authenticator, CryptoScheme};
pub use digest::Digest;
pub use identifiers::{primary_for_view, ReplicaId};
pub use message::{
    method, ClientReplyArgs, ClientReplyReply, CommitArgs, CommitReply, GetStateChecksumArgs,
    GetStateChecksumReply, PrePrepareArgs, PrePrepareReply, PrepareArgs, PrepareReply,
};
pub use signing::{commit_payload, pre_prepare_payload, prepare_payload};
