//! Common Error Types
//!
//! Root error type aggregating the module errors. Only the outermost task
//! boundary decides whether an error is fatal.

use thiserror::Error;

use crate::bitcoin::rpc::BitcoinRpcError;
use crate::bitcoin::zmq::ZmqError;
use crate::config::ConfigError;
use crate::keyring::KeyringError;
use crate::logging::LoggingError;
use crate::relayer::follower::FollowerError;
use crate::side::client::SideError;

/// Root error type for the relayer
#[derive(Debug, Error)]
pub enum RelayerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("keyring error: {0}")]
    Keyring(#[from] KeyringError),

    #[error("bitcoin error: {0}")]
    Bitcoin(#[from] BitcoinRpcError),

    #[error("zmq error: {0}")]
    Zmq(#[from] ZmqError),

    #[error("sidechain error: {0}")]
    Side(#[from] SideError),

    #[error("follower error: {0}")]
    Follower(#[from] FollowerError),

    #[error("relayer {0} is not an authorized sender on the sidechain")]
    Unauthorized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using RelayerError
pub type Result<T> = std::result::Result<T, RelayerError>;
