//! Bitcoin ZMQ Block Notifications
//!
//! Subscribes to bitcoind's `hashblock` topic and forwards block hashes
//! onto a bounded channel. ZMQ transmits hashes in internal (little-endian)
//! byte order, which is also how [`BlockHash`] stores them.

use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket};

/// Topic published by bitcoind for new block hashes.
const HASHBLOCK_TOPIC: &str = "hashblock";

/// ZMQ subscription errors
#[derive(Debug, Error)]
pub enum ZmqError {
    #[error("zmq error: {0}")]
    Socket(#[from] zeromq::ZmqError),
}

/// Connect to the node's ZMQ publisher and forward `hashblock`
/// notifications until cancelled. Malformed frames are logged and dropped;
/// the subscription itself stays up.
pub async fn subscribe_hashblock(
    endpoint: String,
    sender: mpsc::Sender<BlockHash>,
    cancel: CancellationToken,
) -> Result<(), ZmqError> {
    let mut socket = SubSocket::new();
    socket.connect(&endpoint).await?;
    socket.subscribe(HASHBLOCK_TOPIC).await?;

    info!(%endpoint, "waiting for blocks...");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("zmq reader cancelled");
                return Ok(());
            }
            message = socket.recv() => {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        error!(error = %e, "zmq receive failed");
                        continue;
                    }
                };

                let topic = message.get(0).map(|frame| frame.to_vec()).unwrap_or_default();
                let payload = message.get(1).map(|frame| frame.to_vec()).unwrap_or_default();
                let Some(hash) = parse_hashblock(&topic, &payload) else {
                    warn!("dropping malformed hashblock notification");
                    continue;
                };

                if sender.send(hash).await.is_err() {
                    // Receiver side is gone, nothing left to do.
                    return Ok(());
                }
            }
        }
    }
}

/// Parse the `["hashblock", <hash32>, <seq>]` multipart frames.
fn parse_hashblock(topic: &[u8], payload: &[u8]) -> Option<BlockHash> {
    if topic != HASHBLOCK_TOPIC.as_bytes() {
        return None;
    }

    let bytes: [u8; 32] = payload.try_into().ok()?;
    Some(BlockHash::from_byte_array(bytes))
}
