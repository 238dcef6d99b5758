//! Bitcoin Network Access
//!
//! Read-only facade over Bitcoin Core: JSON-RPC for hashes, headers,
//! blocks and raw transactions plus transaction broadcast, and a ZMQ
//! subscription for new-block notifications.

pub mod rpc;
pub mod zmq;

pub use rpc::{BitcoinReader, BitcoinRpcClient, BitcoinRpcError, HeaderInfo};
