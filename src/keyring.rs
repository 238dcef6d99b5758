//! Encrypted Local Keyring
//!
//! Stores BIP-39 seeds encrypted at rest under `<home>/keyring/` and
//! derives the relayer account key and local vault signing keys from them
//! (BIP-32, SegWit `m/84'/0'/0'/0/0` by default, Taproot `m/86'/0'/0'/0/0`).
//!
//! The store key is the SHA-256 of a passphrase; the default passphrase is
//! empty, which matches the test-backend semantics this keyring is meant
//! for. Do not keep mainnet funds behind it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use aes_gcm_siv::aead::Aead;
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Address, Network, NetworkKind, ScriptBuf};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Keyring errors
#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("key {0} not found in keyring")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed keyring entry: {0}")]
    Malformed(String),

    #[error("failed to decrypt keyring entry (wrong passphrase?)")]
    Decrypt,

    #[error("invalid mnemonic: {0}")]
    Mnemonic(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("vault key {name} derives {derived}, config says {configured}")]
    AddressMismatch {
        name: String,
        derived: String,
        configured: String,
    },
}

/// Supported key derivation flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Segwit,
    Taproot,
}

impl KeyType {
    pub fn derivation_path(&self) -> DerivationPath {
        let path = match self {
            KeyType::Segwit => "m/84'/0'/0'/0/0",
            KeyType::Taproot => "m/86'/0'/0'/0/0",
        };
        path.parse().expect("static derivation path")
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Segwit => "segwit",
            KeyType::Taproot => "taproot",
        }
    }
}

impl FromStr for KeyType {
    type Err = KeyringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "segwit" => Ok(KeyType::Segwit),
            "taproot" => Ok(KeyType::Taproot),
            _ => Err(KeyringError::Malformed(format!("unknown key type: {s}"))),
        }
    }
}

/// A key loaded from the keyring, derived and ready to sign.
#[derive(Debug, Clone)]
pub struct StoredKey {
    pub name: String,
    pub key_type: KeyType,
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl StoredKey {
    /// The on-chain address of this key under the given network.
    pub fn address(&self, network: Network) -> Address {
        let secp = Secp256k1::new();
        match self.key_type {
            KeyType::Segwit => Address::p2wpkh(&CompressedPublicKey(self.public_key), network),
            KeyType::Taproot => {
                let (xonly, _) = self.public_key.x_only_public_key();
                Address::p2tr(&secp, xonly, None, network)
            }
        }
    }
}

/// On-disk entry format: the seed is AES-256-GCM-SIV encrypted.
#[derive(Debug, Serialize, Deserialize)]
struct KeyEntry {
    name: String,
    key_type: KeyType,
    nonce: String,
    seed: String,
}

/// File-based keyring rooted at `<home>/keyring/`.
pub struct Keyring {
    dir: PathBuf,
    passphrase: String,
}

impl Keyring {
    pub fn open(home: &Path) -> Self {
        Self {
            dir: home.join("keyring"),
            passphrase: String::new(),
        }
    }

    pub fn with_passphrase(home: &Path, passphrase: impl Into<String>) -> Self {
        Self {
            dir: home.join("keyring"),
            passphrase: passphrase.into(),
        }
    }

    /// Create (or overwrite) an entry from a mnemonic and return the
    /// derived key.
    pub fn create(
        &self,
        name: &str,
        mnemonic: &str,
        key_type: KeyType,
    ) -> Result<StoredKey, KeyringError> {
        let mnemonic = Mnemonic::parse(mnemonic.trim())
            .map_err(|e| KeyringError::Mnemonic(e.to_string()))?;
        let seed = mnemonic.to_seed("");

        fs::create_dir_all(&self.dir)?;

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce_bytes), seed.as_slice())
            .map_err(|_| KeyringError::Decrypt)?;

        let entry = KeyEntry {
            name: name.to_string(),
            key_type,
            nonce: hex::encode(nonce_bytes),
            seed: hex::encode(ciphertext),
        };
        let raw = serde_json::to_vec_pretty(&entry)
            .map_err(|e| KeyringError::Malformed(e.to_string()))?;
        fs::write(self.entry_path(name), raw)?;

        derive_key(name, &seed, key_type)
    }

    /// Load and decrypt an entry by name.
    pub fn load(&self, name: &str) -> Result<StoredKey, KeyringError> {
        let path = self.entry_path(name);
        if !path.exists() {
            return Err(KeyringError::NotFound(name.to_string()));
        }
        let raw = fs::read(path)?;
        let entry: KeyEntry =
            serde_json::from_slice(&raw).map_err(|e| KeyringError::Malformed(e.to_string()))?;

        let nonce_bytes =
            hex::decode(&entry.nonce).map_err(|e| KeyringError::Malformed(e.to_string()))?;
        let ciphertext =
            hex::decode(&entry.seed).map_err(|e| KeyringError::Malformed(e.to_string()))?;
        let seed = self
            .cipher()
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| KeyringError::Decrypt)?;

        derive_key(name, &seed, entry.key_type)
    }

    /// Names of all entries in the keyring.
    pub fn list(&self) -> Result<Vec<String>, KeyringError> {
        let mut names = Vec::new();
        if !self.dir.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn cipher(&self) -> Aes256GcmSiv {
        let key: [u8; 32] = Sha256::digest(self.passphrase.as_bytes()).into();
        Aes256GcmSiv::new(&key.into())
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

fn derive_key(name: &str, seed: &[u8], key_type: KeyType) -> Result<StoredKey, KeyringError> {
    let secp = Secp256k1::new();
    let master = Xpriv::new_master(NetworkKind::Main, seed)
        .map_err(|e| KeyringError::Derivation(e.to_string()))?;
    let child = master
        .derive_priv(&secp, &key_type.derivation_path())
        .map_err(|e| KeyringError::Derivation(e.to_string()))?;

    let secret_key = child.private_key;
    let public_key = secret_key.public_key(&secp);

    Ok(StoredKey {
        name: name.to_string(),
        key_type,
        secret_key,
        public_key,
    })
}

/// A vault signing key, indexed by the pk_script of its address for O(1)
/// PSBT-input lookup.
#[derive(Debug, Clone)]
pub struct VaultKey {
    pub address: Address,
    pub script_pubkey: ScriptBuf,
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

/// Read-only map of locally held vault keys, built once at startup.
#[derive(Debug, Default)]
pub struct VaultKeys {
    by_script: HashMap<ScriptBuf, VaultKey>,
}

impl VaultKeys {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the `vault1..vaultN` keyring entries matching the configured
    /// vault addresses.
    pub fn load(
        keyring: &Keyring,
        vault_addresses: &[String],
        network: Network,
    ) -> Result<Self, KeyringError> {
        let mut by_script = HashMap::with_capacity(vault_addresses.len());

        for (i, configured) in vault_addresses.iter().enumerate() {
            let name = format!("{}{}", crate::config::VAULT_KEY_PREFIX, i + 1);
            let key = keyring.load(&name)?;

            let address = key.address(network);
            if address.to_string() != *configured {
                return Err(KeyringError::AddressMismatch {
                    name,
                    derived: address.to_string(),
                    configured: configured.clone(),
                });
            }

            let script_pubkey = address.script_pubkey();
            by_script.insert(
                script_pubkey.clone(),
                VaultKey {
                    address,
                    script_pubkey,
                    secret_key: key.secret_key,
                    public_key: key.public_key,
                },
            );
        }

        Ok(Self { by_script })
    }

    pub fn get(&self, script_pubkey: &ScriptBuf) -> Option<&VaultKey> {
        self.by_script.get(script_pubkey)
    }

    pub fn is_empty(&self) -> bool {
        self.by_script.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_script.len()
    }
}

/// Generate a fresh 12-word mnemonic.
pub fn generate_mnemonic() -> Result<Mnemonic, KeyringError> {
    Mnemonic::generate(12).map_err(|e| KeyringError::Mnemonic(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_segwit_derivation_matches_bip84_vector() {
        let seed = Mnemonic::parse(TEST_MNEMONIC).unwrap().to_seed("");
        let key = derive_key("side", &seed, KeyType::Segwit).unwrap();
        assert_eq!(
            key.address(Network::Bitcoin).to_string(),
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );
    }

    #[test]
    fn test_create_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(dir.path());

        let created = keyring.create("side", TEST_MNEMONIC, KeyType::Segwit).unwrap();
        let loaded = keyring.load("side").unwrap();

        assert_eq!(created.secret_key, loaded.secret_key);
        assert_eq!(created.public_key, loaded.public_key);
        assert_eq!(keyring.list().unwrap(), vec!["side".to_string()]);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(dir.path());
        keyring.create("side", TEST_MNEMONIC, KeyType::Segwit).unwrap();

        let wrong = Keyring::with_passphrase(dir.path(), "hunter2");
        assert!(matches!(wrong.load("side"), Err(KeyringError::Decrypt)));
    }

    #[test]
    fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(dir.path());
        assert!(matches!(
            keyring.load("vault1"),
            Err(KeyringError::NotFound(_))
        ));
    }

    #[test]
    fn test_vault_keys_address_check() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(dir.path());
        let key = keyring.create("vault1", TEST_MNEMONIC, KeyType::Segwit).unwrap();
        let addr = key.address(Network::Bitcoin).to_string();

        let keys = VaultKeys::load(&keyring, &[addr.clone()], Network::Bitcoin).unwrap();
        assert_eq!(keys.len(), 1);

        let script = addr
            .parse::<Address<bitcoin::address::NetworkUnchecked>>()
            .unwrap()
            .assume_checked()
            .script_pubkey();
        assert!(keys.get(&script).is_some());

        // Re-key the entry as taproot: the stored key no longer derives
        // the configured segwit address and loading must fail.
        keyring
            .create("vault1", TEST_MNEMONIC, KeyType::Taproot)
            .unwrap();
        assert!(matches!(
            VaultKeys::load(&keyring, &[addr], Network::Bitcoin),
            Err(KeyringError::AddressMismatch { .. })
        ));
    }
}
