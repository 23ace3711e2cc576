//! Outbound RPC: per-peer clients and the connection cache.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use pbft_types::ReplicaId;

use super::{read_frame, write_frame, RequestFrame, RpcError};
use crate::config::ClusterConfig;

/// One TCP connection to a peer.
///
/// The stream mutex serializes calls: a request frame and its response
/// frame are exchanged without interleaving, so a connection carries at
/// most one in-flight call.
pub struct PeerClient {
    stream: Mutex<TcpStream>,
}

impl PeerClient {
    pub async fn connect(addr: &str) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: Mutex::new(stream),
        })
    }

    /// Invoke `method` and wait for its reply record.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let request = bincode::serialize(&RequestFrame {
            method: method.to_string(),
            body: bincode::serialize(args)?,
        })?;

        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &request).await?;
        let response = read_frame(&mut *stream)
            .await?
            .ok_or(RpcError::ConnectionClosed)?;
        drop(stream);

        Ok(bincode::deserialize(&response)?)
    }
}

/// Lazily-dialed connections to every peer, keyed by replica id.
///
/// A missing or broken connection triggers exactly one re-dial before the
/// send is reported as failed; callers treat that failure as best-effort
/// and move on.
pub struct ConnectionCache {
    addrs: HashMap<ReplicaId, String>,
    conns: Mutex<HashMap<ReplicaId, Arc<PeerClient>>>,
}

impl ConnectionCache {
    pub fn new(cluster: &ClusterConfig) -> Self {
        let addrs = cluster
            .replica_ids()
            .into_iter()
            .filter_map(|id| cluster.addr_of(id).ok().map(|a| (id, a.to_string())))
            .collect();
        Self {
            addrs,
            conns: Mutex::new(HashMap::new()),
        }
    }

    /// Call `method` on `peer`, re-dialing a dead connection once.
    pub async fn call<A, R>(&self, peer: ReplicaId, method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let conn = self.connection(peer).await?;
        match conn.call(method, args).await {
            Ok(reply) => Ok(reply),
            Err(err) if err.is_transport() => {
                debug!(%peer, method, %err, "call failed, re-dialing");
                self.invalidate(peer).await;
                let conn = self.connection(peer).await?;
                conn.call(method, args).await
            }
            Err(err) => Err(err),
        }
    }

    async fn connection(&self, peer: ReplicaId) -> Result<Arc<PeerClient>, RpcError> {
        if let Some(conn) = self.conns.lock().await.get(&peer) {
            return Ok(conn.clone());
        }
        let addr = self.addrs.get(&peer).ok_or_else(|| {
            RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("replica {peer} has no configured address"),
            ))
        })?;
        // Dial without holding the cache lock; if a concurrent dial won the
        // race, keep the cached connection and drop ours.
        let conn = Arc::new(PeerClient::connect(addr).await?);
        let mut conns = self.conns.lock().await;
        Ok(conns.entry(peer).or_insert(conn).clone())
    }

    async fn invalidate(&self, peer: ReplicaId) {
        self.conns.lock().await.remove(&peer);
    }
}
