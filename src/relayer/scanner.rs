//! Vault Transaction Scanner
//!
//! For each header the follower submits, scans the block that just became
//! confirmed for vault activity: inputs spent by a vault key (withdrawals)
//! and outputs paying a vault address (deposits). Matches are serialized,
//! proven with a merkle proof and shipped to the sidechain. The sidechain
//! dedups by (block hash, txid), so rescanning a block is harmless.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::consensus::encode;
use bitcoin::{Address, Network, Transaction, Txid};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bitcoin::rpc::{BitcoinReader, BitcoinRpcError};
use crate::merkle::{self, MerkleError};
use crate::side::client::{SideBridge, SideError};
use crate::side::proto::{self, Params};

/// Scanner errors. All of these are per-block or per-transaction; the
/// follower logs them and keeps going.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("bitcoin error: {0}")]
    Bitcoin(#[from] BitcoinRpcError),

    #[error("sidechain error: {0}")]
    Side(#[from] SideError),

    #[error("merkle proof error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("cannot resolve deposit sender of {txid}: {reason}")]
    SenderExtraction { txid: Txid, reason: String },
}

/// Scans newly confirmed blocks for vault deposits and withdrawals.
pub struct VaultScanner {
    btc: Arc<dyn BitcoinReader>,
    side: Arc<dyn SideBridge>,
    params: Params,
    network: Network,
}

impl VaultScanner {
    pub fn new(
        btc: Arc<dyn BitcoinReader>,
        side: Arc<dyn SideBridge>,
        params: Params,
        network: Network,
    ) -> Self {
        Self {
            btc,
            side,
            params,
            network,
        }
    }

    /// Scan the block that became confirmed once the chain reached
    /// `current`. The scanned height lags by the params' confirmation
    /// depth, clamped to six blocks when the params would put it at the
    /// current height (bootstrap behavior).
    pub async fn scan(&self, current: u64) -> Result<(), ScannerError> {
        let confirmations = self.params.confirmations.max(0) as u64;
        let mut height = current.saturating_sub(confirmations);
        if height == current {
            height = current.saturating_sub(6);
        }

        info!(height, current, "scanning block");

        // The sidechain must itself have observed enough headers for the
        // proof target to be verifiable there.
        let tip = self.side.query_chain_tip().await?;
        if (height as i128) < tip.height as i128 - confirmations as i128 {
            return Ok(());
        }

        let blockhash = self.btc.block_hash(height).await?;
        let block = self.btc.block(&blockhash).await?;
        let txids: Vec<Txid> = block.txdata.iter().map(|tx| tx.compute_txid()).collect();

        for (i, tx) in block.txdata.iter().enumerate() {
            debug!(index = i, txid = %txids[i], "checking transaction");
            if let Err(e) = self
                .process_transaction(&blockhash, tx, &txids[i], &txids)
                .await
            {
                warn!(txid = %txids[i], error = %e, "skipping vault transaction");
            }
        }

        Ok(())
    }

    /// A transaction may legitimately be both a withdrawal and a deposit
    /// (vault-to-vault rebalance) and then emits both messages.
    async fn process_transaction(
        &self,
        blockhash: &str,
        tx: &Transaction,
        txid: &Txid,
        txids: &[Txid],
    ) -> Result<(), ScannerError> {
        if self.is_vault_withdrawal(tx) {
            self.submit_withdrawal_tx(blockhash, tx, txid, txids).await?;
        }
        if self.pays_vault_output(tx) {
            self.submit_deposit_tx(blockhash, tx, txid, txids).await?;
        }
        Ok(())
    }

    /// Withdrawal: the first input carries the canonical P2WPKH witness
    /// shape `[sig, pubkey]` and the pubkey belongs to a vault.
    fn is_vault_withdrawal(&self, tx: &Transaction) -> bool {
        let Some(input) = tx.input.first() else {
            return false;
        };
        if input.witness.len() != 2 {
            return false;
        }
        let Some(pubkey) = input.witness.nth(1) else {
            return false;
        };
        proto::select_vault_by_pub_key(&self.params.vaults, &hex::encode(pubkey)).is_some()
    }

    /// Deposit: some output pays a vault address under this network.
    fn pays_vault_output(&self, tx: &Transaction) -> bool {
        tx.output.iter().any(|out| {
            Address::from_script(&out.script_pubkey, self.network).is_ok_and(|addr| {
                proto::select_vault_by_address(&self.params.vaults, &addr.to_string()).is_some()
            })
        })
    }

    async fn submit_withdrawal_tx(
        &self,
        blockhash: &str,
        tx: &Transaction,
        txid: &Txid,
        txids: &[Txid],
    ) -> Result<(), ScannerError> {
        let tx_bytes = BASE64.encode(encode::serialize(tx));
        let proof = merkle::generate_proof(txids, txid)?;

        self.side
            .submit_withdraw_tx(blockhash.to_string(), tx_bytes, proof)
            .await?;
        info!(%txid, "submitted withdrawal transaction");
        Ok(())
    }

    /// The previous transaction of the first input rides along so the
    /// sidechain can attribute the deposit to its sender; it must resolve
    /// to exactly one address.
    async fn submit_deposit_tx(
        &self,
        blockhash: &str,
        tx: &Transaction,
        txid: &Txid,
        txids: &[Txid],
    ) -> Result<(), ScannerError> {
        let Some(input) = tx.input.first() else {
            return Ok(());
        };
        if tx.is_coinbase() {
            return Err(ScannerError::SenderExtraction {
                txid: *txid,
                reason: "coinbase input".to_string(),
            });
        }

        let prev_tx = self.btc.raw_transaction(&input.previous_output.txid).await?;
        let prev_out = prev_tx
            .output
            .get(input.previous_output.vout as usize)
            .ok_or_else(|| ScannerError::SenderExtraction {
                txid: *txid,
                reason: "previous output index out of range".to_string(),
            })?;

        Address::from_script(&prev_out.script_pubkey, self.network).map_err(|e| {
            ScannerError::SenderExtraction {
                txid: *txid,
                reason: e.to_string(),
            }
        })?;

        let prev_tx_bytes = BASE64.encode(encode::serialize(&prev_tx));
        let tx_bytes = BASE64.encode(encode::serialize(tx));
        let proof = merkle::generate_proof(txids, txid)?;

        self.side
            .submit_deposit_tx(blockhash.to_string(), prev_tx_bytes, tx_bytes, proof)
            .await?;
        info!(%txid, "submitted deposit transaction");
        Ok(())
    }
}
