//! Withdrawal Co-Signer & Broadcaster
//!
//! Two periodic passes against the sidechain's signing requests. The
//! co-signer picks up CREATED requests, signs their PSBT inputs with the
//! locally held vault keys and submits the signatures. The broadcaster
//! picks up SIGNED requests, extracts the final transaction, broadcasts
//! it to Bitcoin and reports the status back. Per-request failures are
//! logged and retried naturally on the next pass.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::hashes::Hash;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, XOnlyPublicKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::{ecdsa, taproot, TapTweakHash, Witness};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::bitcoin::rpc::{BitcoinReader, BitcoinRpcError};
use crate::keyring::VaultKeys;
use crate::side::client::{SideBridge, SideError};
use crate::side::proto::{BitcoinSigningRequest, SigningStatus};

/// Withdrawal pipeline errors
#[derive(Debug, Error)]
pub enum WithdrawalError {
    #[error("invalid base64 psbt: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid psbt: {0}")]
    Psbt(String),

    #[error("witness utxo required for input {0}")]
    MissingWitnessUtxo(usize),

    #[error("no key found for input {0}")]
    NoKeyForInput(usize),

    #[error("unsupported script type for input {0}")]
    UnsupportedScript(usize),

    #[error("sighash computation failed for input {0}: {1}")]
    Sighash(usize, String),

    #[error("signing failed for input {0}: {1}")]
    Signing(usize, String),

    #[error("transaction is not complete")]
    Incomplete,

    #[error("failed to extract transaction: {0}")]
    Extract(String),

    #[error("bitcoin error: {0}")]
    Bitcoin(#[from] BitcoinRpcError),

    #[error("sidechain error: {0}")]
    Side(#[from] SideError),
}

/// Periodic co-signer and broadcaster over the sidechain's signing
/// requests.
pub struct WithdrawalProcessor {
    btc: Arc<dyn BitcoinReader>,
    side: Arc<dyn SideBridge>,
    vault_keys: Arc<VaultKeys>,
    local_signing: bool,
}

impl WithdrawalProcessor {
    pub fn new(
        btc: Arc<dyn BitcoinReader>,
        side: Arc<dyn SideBridge>,
        vault_keys: Arc<VaultKeys>,
        local_signing: bool,
    ) -> Self {
        Self {
            btc,
            side,
            vault_keys,
            local_signing,
        }
    }

    /// Sign all CREATED requests with the local vault keys. Only active
    /// when local signing is enabled and at least one key is resident.
    pub async fn sign_pass(&self) {
        if !self.local_signing || self.vault_keys.is_empty() {
            return;
        }

        let requests = match self
            .side
            .query_signing_requests(SigningStatus::Created)
            .await
        {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "failed to query signing requests");
                return;
            }
        };
        if requests.is_empty() {
            return;
        }

        info!(count = requests.len(), "signing withdrawal transactions");
        for request in requests {
            if let Err(e) = self.sign_request(&request).await {
                error!(txid = %request.txid, error = %e, "failed to sign withdrawal");
            }
        }
    }

    async fn sign_request(&self, request: &BitcoinSigningRequest) -> Result<(), WithdrawalError> {
        let raw = BASE64.decode(&request.psbt)?;
        let mut packet =
            Psbt::deserialize(&raw).map_err(|e| WithdrawalError::Psbt(e.to_string()))?;

        sign_psbt(&mut packet, &self.vault_keys)?;

        let signed = BASE64.encode(packet.serialize());
        self.side
            .submit_withdraw_signatures(request.txid.clone(), signed)
            .await?;
        Ok(())
    }

    /// Broadcast all SIGNED requests to the Bitcoin network and flip
    /// their sidechain status to BROADCASTED.
    pub async fn broadcast_pass(&self) {
        let requests = match self
            .side
            .query_signing_requests(SigningStatus::Signed)
            .await
        {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "failed to query signed requests");
                return;
            }
        };
        if requests.is_empty() {
            return;
        }

        info!(count = requests.len(), "broadcasting withdrawal transactions");
        for request in requests {
            if let Err(e) = self.broadcast_request(&request).await {
                error!(txid = %request.txid, error = %e, "failed to broadcast withdrawal");
            }
        }
    }

    async fn broadcast_request(
        &self,
        request: &BitcoinSigningRequest,
    ) -> Result<(), WithdrawalError> {
        let raw = BASE64.decode(&request.psbt)?;
        let packet = Psbt::deserialize(&raw).map_err(|e| WithdrawalError::Psbt(e.to_string()))?;

        if !is_complete(&packet) {
            return Err(WithdrawalError::Incomplete);
        }

        let tx = packet
            .extract_tx()
            .map_err(|e| WithdrawalError::Extract(e.to_string()))?;
        let txid = self.btc.send_raw_transaction(&tx).await?;
        info!(%txid, "withdrawal broadcasted");

        self.side
            .submit_withdraw_status(request.txid.clone(), SigningStatus::Broadcasted)
            .await?;
        Ok(())
    }
}

/// All inputs carry a final witness.
pub fn is_complete(packet: &Psbt) -> bool {
    !packet.inputs.is_empty()
        && packet
            .inputs
            .iter()
            .all(|input| input.final_script_witness.is_some() || input.final_script_sig.is_some())
}

/// Sign and finalize every input of the packet with the matching vault
/// key. Native SegWit inputs get an ECDSA partial signature, Taproot
/// key-spend inputs a Schnorr signature over the tweaked key; any other
/// script type aborts the request. Re-signing an input that already
/// carries this key's signature is a no-op.
pub fn sign_psbt(packet: &mut Psbt, keys: &VaultKeys) -> Result<(), WithdrawalError> {
    let mut prevouts = Vec::with_capacity(packet.inputs.len());
    for (i, input) in packet.inputs.iter().enumerate() {
        let utxo = input
            .witness_utxo
            .clone()
            .ok_or(WithdrawalError::MissingWitnessUtxo(i))?;
        prevouts.push(utxo);
    }

    let secp = Secp256k1::new();
    let unsigned_tx = packet.unsigned_tx.clone();
    let mut cache = SighashCache::new(&unsigned_tx);

    for i in 0..packet.inputs.len() {
        let prevout = prevouts[i].clone();
        let key = keys
            .get(&prevout.script_pubkey)
            .ok_or(WithdrawalError::NoKeyForInput(i))?;

        if packet.inputs[i].final_script_witness.is_some() {
            continue;
        }

        if prevout.script_pubkey.is_p2wpkh() {
            let public_key = bitcoin::PublicKey::new(key.public_key);

            if !packet.inputs[i].partial_sigs.contains_key(&public_key) {
                let sighash_type = packet.inputs[i]
                    .sighash_type
                    .map(|t| t.ecdsa_hash_ty())
                    .transpose()
                    .map_err(|e| WithdrawalError::Sighash(i, e.to_string()))?
                    .unwrap_or(EcdsaSighashType::All);

                let sighash = cache
                    .p2wpkh_signature_hash(i, &prevout.script_pubkey, prevout.value, sighash_type)
                    .map_err(|e| WithdrawalError::Sighash(i, e.to_string()))?;
                let signature = secp.sign_ecdsa(
                    &Message::from_digest(sighash.to_byte_array()),
                    &key.secret_key,
                );

                packet.inputs[i].partial_sigs.insert(
                    public_key,
                    ecdsa::Signature {
                        signature,
                        sighash_type,
                    },
                );
            }

            let signature = packet.inputs[i]
                .partial_sigs
                .get(&public_key)
                .copied()
                .ok_or_else(|| WithdrawalError::Signing(i, "partial signature lost".to_string()))?;
            let witness = Witness::from_slice(&[signature.to_vec(), public_key.to_bytes()]);
            finalize_input(&mut packet.inputs[i], witness);
        } else if prevout.script_pubkey.is_p2tr() {
            if packet.inputs[i].tap_key_sig.is_none() {
                let sighash_type = packet.inputs[i]
                    .sighash_type
                    .map(|t| t.taproot_hash_ty())
                    .transpose()
                    .map_err(|e| WithdrawalError::Sighash(i, e.to_string()))?
                    .unwrap_or(TapSighashType::Default);

                let sighash = cache
                    .taproot_key_spend_signature_hash(i, &Prevouts::All(&prevouts), sighash_type)
                    .map_err(|e| WithdrawalError::Sighash(i, e.to_string()))?;

                let keypair = Keypair::from_secret_key(&secp, &key.secret_key);
                let (internal_key, _) = XOnlyPublicKey::from_keypair(&keypair);
                let tweak = TapTweakHash::from_key_and_tweak(internal_key, None);
                let tweaked = keypair
                    .add_xonly_tweak(&secp, &tweak.to_scalar())
                    .map_err(|e| WithdrawalError::Signing(i, e.to_string()))?;

                let signature = secp.sign_schnorr(
                    &Message::from_digest(sighash.to_byte_array()),
                    &tweaked,
                );
                packet.inputs[i].tap_key_sig = Some(taproot::Signature {
                    signature,
                    sighash_type,
                });
            }

            let signature = packet.inputs[i]
                .tap_key_sig
                .ok_or_else(|| WithdrawalError::Signing(i, "key-spend signature lost".to_string()))?;
            let witness = Witness::from_slice(&[signature.to_vec()]);
            finalize_input(&mut packet.inputs[i], witness);
        } else {
            return Err(WithdrawalError::UnsupportedScript(i));
        }
    }

    Ok(())
}

/// Set the final witness and clear the signing artifacts, per the PSBT
/// finalization rules.
fn finalize_input(input: &mut bitcoin::psbt::Input, witness: Witness) {
    input.final_script_witness = Some(witness);
    input.partial_sigs.clear();
    input.sighash_type = None;
    input.redeem_script = None;
    input.witness_script = None;
    input.bip32_derivation.clear();
    input.tap_key_sig = None;
    input.tap_script_sigs.clear();
    input.tap_scripts.clear();
    input.tap_key_origins.clear();
    input.tap_internal_key = None;
    input.tap_merkle_root = None;
}
