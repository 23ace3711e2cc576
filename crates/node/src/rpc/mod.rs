//! Length-framed RPC over TCP.
//!
//! # Wire Format
//!
//! Every frame is a `u32` little-endian byte length followed by a bincode
//! payload. A request payload is a [`RequestFrame`] naming the method and
//! carrying the bincode-encoded argument record; a response payload is the
//! bincode-encoded reply record, bare.
//!
//! Frames above [`MAX_FRAME_BYTES`] are rejected before allocation.

mod client;
mod server;

pub use client::{ConnectionCache, PeerClient};
pub(crate) use server::serve;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; a batch of commands stays far below this.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Errors from the RPC transport.
///
/// Sends between replicas are best-effort: callers log these and move on.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode/decode: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {got} bytes exceeds the {max} byte limit")]
    FrameTooLarge { got: usize, max: usize },

    #[error("connection closed mid-call")]
    ConnectionClosed,

    #[error("unknown method {0:?}")]
    UnknownMethod(String),
}

impl RpcError {
    /// Whether a retry on a fresh connection could help.
    pub(crate) fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}

/// One named call: method plus bincode-encoded arguments.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RequestFrame {
    pub method: String,
    pub body: Vec<u8>,
}

pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge {
            got: payload.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` on a connection closed at a frame boundary.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, RpcError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge {
            got: len,
            max: MAX_FRAME_BYTES,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello").await.unwrap();
        write_frame(&mut a, b"").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), b"hello");
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), b"");
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected_before_allocation() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let header = ((MAX_FRAME_BYTES + 1) as u32).to_le_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &header)
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(RpcError::FrameTooLarge { .. })
        ));
    }
}
