//! Inbound RPC: listener and method dispatch.

use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use pbft_types::method;

use super::{read_frame, write_frame, RequestFrame, RpcError};
use crate::node::Node;

/// Accept loop; one task per inbound connection.
pub(crate) async fn serve(listener: TcpListener, node: Node) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "failed to set nodelay");
        }
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, node).await {
                debug!(%remote, %err, "connection ended");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, node: Node) -> Result<(), RpcError> {
    while let Some(frame) = read_frame(&mut stream).await? {
        let request: RequestFrame = bincode::deserialize(&frame)?;
        let response = dispatch(&node, &request.method, &request.body).await?;
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

async fn dispatch(node: &Node, name: &str, body: &[u8]) -> Result<Vec<u8>, RpcError> {
    match name {
        method::PRE_PREPARE => reply(node.on_pre_prepare(bincode::deserialize(body)?).await),
        method::PREPARE => reply(node.on_prepare(bincode::deserialize(body)?).await),
        method::COMMIT => reply(node.on_commit(bincode::deserialize(body)?).await),
        method::CLIENT_REPLY => reply(node.on_client_reply(bincode::deserialize(body)?).await),
        method::GET_STATE_CHECKSUM => {
            let _: pbft_types::GetStateChecksumArgs = bincode::deserialize(body)?;
            reply(node.on_state_checksum().await)
        }
        other => Err(RpcError::UnknownMethod(other.to_string())),
    }
}

fn reply<R: Serialize>(record: R) -> Result<Vec<u8>, RpcError> {
    Ok(bincode::serialize(&record)?)
}
