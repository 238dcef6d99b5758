//! Relayer Configuration
//!
//! Loads the TOML configuration file from the relayer home directory and
//! validates it before anything else starts. All network endpoints, the
//! sidechain sender address and the vault address list live here.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application name, also used for the default home directory.
pub const APP_NAME: &str = "shuttler";

/// Keyring entry name for the relayer's sidechain account key.
pub const INTERNAL_KEY_NAME: &str = "side";

/// Keyring entry name prefix for locally held vault keys.
pub const VAULT_KEY_PREFIX: &str = "vault";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown bitcoin chain: {0}")]
    UnknownChain(String),

    #[error("zmq endpoint not configured")]
    MissingZmq,

    #[error("invalid vault address {0}: {1}")]
    InvalidVaultAddress(String, String),
}

/// Bitcoin chain selector, mapped onto [`bitcoin::Network`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Mainnet,
    Testnet,
    Regtest,
    Signet,
}

impl FromStr for Chain {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Chain::Mainnet),
            "testnet" => Ok(Chain::Testnet),
            "regtest" => Ok(Chain::Regtest),
            "signet" => Ok(Chain::Signet),
            _ => Err(ConfigError::UnknownChain(s.to_string())),
        }
    }
}

impl Chain {
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Chain::Mainnet => bitcoin::Network::Bitcoin,
            Chain::Testnet => bitcoin::Network::Testnet,
            Chain::Regtest => bitcoin::Network::Regtest,
            Chain::Signet => bitcoin::Network::Signet,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    /// Log level of the daemon
    #[serde(rename = "log-level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bitcoin {
    /// Bitcoin chain: mainnet, testnet, regtest, signet
    pub chain: String,

    /// Bitcoin Core RPC endpoint (host:port)
    pub rpc: String,
    /// Bitcoin RPC user
    pub rpcuser: String,
    /// Bitcoin RPC password
    pub rpcpassword: String,
    /// Bitcoin RPC protocol (http or https)
    pub protocol: String,

    /// Bitcoin ZMQ host
    pub zmqhost: String,
    /// Bitcoin ZMQ port
    pub zmqport: u16,

    /// Vault address list
    #[serde(rename = "vault-addresses")]
    pub vaults: Vec<String>,
    /// Enable local vault signers, only used for testing
    #[serde(rename = "local-signing")]
    pub local_signing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Side {
    /// Sidechain gRPC endpoint
    pub grpc: String,
    /// Sidechain RPC endpoint
    pub rpc: String,
    /// Sidechain REST endpoint
    pub rest: String,

    /// Frequency of withdrawal polling in seconds
    pub frequency: u64,
    /// Sidechain sender address
    pub sender: String,
    /// Sidechain chain ID
    #[serde(rename = "chain-id")]
    pub chain_id: String,
    /// Sidechain gas limit
    pub gas: u64,

    /// Retry count for failed submissions
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub global: Global,
    pub bitcoin: Bitcoin,
    pub side: Side,
    /// From address for the transaction
    #[serde(rename = "from-address", default)]
    pub from_address: String,
}

impl Config {
    /// Default configuration for the given chain name.
    pub fn default_for(network: &str) -> Self {
        Self {
            global: Global {
                log_level: "info".to_string(),
            },
            bitcoin: Bitcoin {
                chain: network.to_string(),
                rpc: "signet:38332".to_string(),
                rpcuser: "side".to_string(),
                rpcpassword: "12345678".to_string(),
                protocol: "http".to_string(),
                zmqhost: "signet".to_string(),
                zmqport: 38330,
                vaults: Vec::new(),
                local_signing: false,
            },
            side: Side {
                grpc: "localhost:9090".to_string(),
                rpc: "http://localhost:26657".to_string(),
                rest: "http://localhost:1317".to_string(),
                frequency: 6,
                sender: String::new(),
                chain_id: "devnet".to_string(),
                gas: 2_000_000,
                retries: 5,
            },
            from_address: String::new(),
        }
    }

    /// Path of the config file under a home directory.
    pub fn file_path(home: &Path) -> PathBuf {
        home.join("config.toml")
    }

    /// Load the configuration file from the home directory.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = Self::file_path(home);
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let raw = fs::read_to_string(&path)?;
        let cfg: Config = toml::from_str(&raw)?;
        Ok(cfg)
    }

    /// Write the configuration file, creating the home directory if needed.
    pub fn save(&self, home: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(home)?;
        let out = toml::to_string_pretty(self)?;
        fs::write(Self::file_path(home), out)?;
        Ok(())
    }

    /// Parse and validate the configured bitcoin chain.
    pub fn chain(&self) -> Result<Chain, ConfigError> {
        self.bitcoin.chain.parse()
    }

    pub fn network(&self) -> Result<bitcoin::Network, ConfigError> {
        Ok(self.chain()?.bitcoin_network())
    }

    /// Validate the parts that must be correct before the daemon starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let network = self.network()?;

        if self.bitcoin.zmqhost.is_empty() || self.bitcoin.zmqport == 0 {
            return Err(ConfigError::MissingZmq);
        }

        for addr in &self.bitcoin.vaults {
            addr.parse::<bitcoin::Address<bitcoin::address::NetworkUnchecked>>()
                .map_err(|e| ConfigError::InvalidVaultAddress(addr.clone(), e.to_string()))?
                .require_network(network)
                .map_err(|e| ConfigError::InvalidVaultAddress(addr.clone(), e.to_string()))?;
        }

        Ok(())
    }

    /// ZMQ endpoint in tcp:// form.
    pub fn zmq_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.bitcoin.zmqhost, self.bitcoin.zmqport)
    }

    /// Bitcoin Core RPC URL.
    pub fn bitcoin_rpc_url(&self) -> String {
        format!("{}://{}", self.bitcoin.protocol, self.bitcoin.rpc)
    }
}

/// Default home directory: `$HOME/.shuttler`.
pub fn default_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(format!(".{APP_NAME}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_parsing() {
        assert!(matches!("mainnet".parse::<Chain>(), Ok(Chain::Mainnet)));
        assert!(matches!("SIGNET".parse::<Chain>(), Ok(Chain::Signet)));
        assert!(matches!("regtest".parse::<Chain>(), Ok(Chain::Regtest)));
        assert!("devnet".parse::<Chain>().is_err());
    }

    #[test]
    fn test_default_config_roundtrip() {
        let cfg = Config::default_for("signet");
        let raw = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();

        assert_eq!(parsed.bitcoin.chain, "signet");
        assert_eq!(parsed.bitcoin.zmqport, 38330);
        assert_eq!(parsed.side.gas, 2_000_000);
        assert_eq!(parsed.side.retries, 5);
        assert!(!parsed.bitcoin.local_signing);
    }

    #[test]
    fn test_validate_rejects_missing_zmq() {
        let mut cfg = Config::default_for("signet");
        cfg.bitcoin.zmqhost = String::new();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingZmq)));
    }

    #[test]
    fn test_validate_rejects_bad_vault_address() {
        let mut cfg = Config::default_for("signet");
        cfg.bitcoin.vaults.push("not-an-address".to_string());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidVaultAddress(..))
        ));
    }

    #[test]
    fn test_kebab_case_keys() {
        let raw = r#"
            [global]
            log-level = "debug"

            [bitcoin]
            chain = "regtest"
            rpc = "localhost:18443"
            rpcuser = "u"
            rpcpassword = "p"
            protocol = "http"
            zmqhost = "localhost"
            zmqport = 28332
            vault-addresses = []
            local-signing = true

            [side]
            grpc = "localhost:9090"
            rpc = "http://localhost:26657"
            rest = "http://localhost:1317"
            frequency = 6
            sender = ""
            chain-id = "devnet"
            gas = 2000000
            retries = 5
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.global.log_level, "debug");
        assert!(cfg.bitcoin.local_signing);
        assert_eq!(cfg.side.chain_id, "devnet");
    }
}
