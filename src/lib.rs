//! Shuttler - Bitcoin <-> Sidechain Relayer
//!
//! A one-way-plus-signing relayer between a Bitcoin network and a
//! sidechain that maintains an SPV light client of Bitcoin plus a bridge
//! module. Four duties run on a continuous loop:
//!
//! 1. **Header synchronization** - advance the sidechain light-client tip
//!    by submitting successive block headers, handling reorgs.
//! 2. **Vault transaction ingestion** - detect deposits and withdrawals
//!    in confirmed blocks, build SPV proofs and submit them.
//! 3. **Withdrawal co-signing** - sign sidechain-published PSBTs with
//!    locally held vault keys and resubmit.
//! 4. **Withdrawal broadcast** - extract fully signed transactions and
//!    broadcast them to Bitcoin.
//!
//! ## Module Organization
//!
//! - `config` - TOML configuration and chain validation
//! - `logging` - tracing subscriber setup
//! - `error` - root error type
//! - `keyring` - encrypted seed store and key derivation
//! - `merkle` - SPV merkle proof builder/verifier
//! - `bitcoin` - Bitcoin Core JSON-RPC view and ZMQ notifications
//! - `side` - bridge module schema and gRPC client
//! - `relayer` - follower, scanner, withdrawal pipeline, orchestration

pub mod bitcoin;
pub mod config;
pub mod error;
pub mod keyring;
pub mod logging;
pub mod merkle;
pub mod relayer;
pub mod side;

// Re-exports: Configuration
pub use config::{Chain, Config, ConfigError, APP_NAME};

// Re-exports: Errors
pub use error::RelayerError;

// Re-exports: Keyring
pub use keyring::{KeyType, Keyring, KeyringError, StoredKey, VaultKey, VaultKeys};

// Re-exports: Bitcoin view
pub use crate::bitcoin::{BitcoinReader, BitcoinRpcClient, BitcoinRpcError, HeaderInfo};

// Re-exports: Sidechain client
pub use side::{AccountCursor, ChainTip, SideBridge, SideClient, SideError, SigningStatus};

// Re-exports: Relayer
pub use relayer::follower::{FollowerError, FollowerState, HeaderFollower};
pub use relayer::scanner::{ScannerError, VaultScanner};
pub use relayer::withdrawal::{WithdrawalError, WithdrawalProcessor};
pub use relayer::Relayer;
