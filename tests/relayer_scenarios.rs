//! End-to-end relayer scenarios over mocked Bitcoin and sidechain views:
//! cold fast-sync, live extension, one-deep reorg, deposit detection,
//! co-sign-then-broadcast and the unauthorized-startup refusal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::absolute::LockTime;
use bitcoin::block::{Header as BlockHeader, Version as BlockVersion};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::key::CompressedPublicKey;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Block, BlockHash, CompactTarget, Network, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};

use shuttler::bitcoin::rpc::{BitcoinReader, BitcoinRpcError, HeaderInfo};
use shuttler::keyring::{KeyType, Keyring, VaultKeys};
use shuttler::merkle;
use shuttler::relayer::withdrawal::is_complete;
use shuttler::relayer::{authorize_sender, follower::HeaderFollower, scanner::VaultScanner};
use shuttler::side::client::{ChainTip, SideBridge, SideError};
use shuttler::side::proto::{
    self, BitcoinSigningRequest, Params, SigningStatus, Vault,
};
use shuttler::{RelayerError, WithdrawalProcessor};

const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

// ---------------------------------------------------------------------------
// Mock Bitcoin view
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockBitcoin {
    best: Mutex<String>,
    hash_by_height: Mutex<HashMap<u64, String>>,
    headers: Mutex<HashMap<String, HeaderInfo>>,
    blocks: Mutex<HashMap<String, Block>>,
    raw_txs: Mutex<HashMap<Txid, Transaction>>,
    broadcasts: Mutex<Vec<Transaction>>,
}

impl MockBitcoin {
    fn set_best(&self, hash: &str) {
        *self.best.lock().unwrap() = hash.to_string();
    }

    fn add_header(&self, height: u64, hash: &str, prev: &str) {
        let header = HeaderInfo {
            hash: hash.to_string(),
            height,
            version: 2,
            merkle_root: String::new(),
            time: 0,
            nonce: 0,
            bits: "1d00ffff".to_string(),
            previous_block_hash: (!prev.is_empty()).then(|| prev.to_string()),
            n_tx: 1,
        };
        self.hash_by_height
            .lock()
            .unwrap()
            .insert(height, hash.to_string());
        self.headers.lock().unwrap().insert(hash.to_string(), header);
    }

    fn add_block(&self, height: u64, hash: &str, block: Block) {
        self.hash_by_height
            .lock()
            .unwrap()
            .insert(height, hash.to_string());
        self.blocks.lock().unwrap().insert(hash.to_string(), block);
    }

    fn add_raw_tx(&self, tx: Transaction) {
        self.raw_txs.lock().unwrap().insert(tx.compute_txid(), tx);
    }
}

fn missing(what: &str) -> BitcoinRpcError {
    BitcoinRpcError::Rpc {
        code: -8,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl BitcoinReader for MockBitcoin {
    async fn best_block_hash(&self) -> Result<String, BitcoinRpcError> {
        Ok(self.best.lock().unwrap().clone())
    }

    async fn block_hash(&self, height: u64) -> Result<String, BitcoinRpcError> {
        self.hash_by_height
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| missing("block height"))
    }

    async fn block_header_info(&self, hash: &str) -> Result<HeaderInfo, BitcoinRpcError> {
        self.headers
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| missing("header"))
    }

    async fn block(&self, hash: &str) -> Result<Block, BitcoinRpcError> {
        self.blocks
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| missing("block"))
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, BitcoinRpcError> {
        self.raw_txs
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| missing("transaction"))
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, BitcoinRpcError> {
        self.broadcasts.lock().unwrap().push(tx.clone());
        Ok(tx.compute_txid())
    }
}

// ---------------------------------------------------------------------------
// Mock sidechain bridge
// ---------------------------------------------------------------------------

struct MockSide {
    tip: Mutex<ChainTip>,
    submitted_headers: Mutex<Vec<proto::BlockHeader>>,
    deposits: Mutex<Vec<proto::MsgSubmitDepositTransactionRequest>>,
    withdraws: Mutex<Vec<proto::MsgSubmitWithdrawTransactionRequest>>,
    signing_requests: Mutex<Vec<BitcoinSigningRequest>>,
    signatures: Mutex<Vec<(String, String)>>,
    statuses: Mutex<Vec<(String, i32)>>,
}

impl MockSide {
    fn new(tip_hash: &str, tip_height: u64) -> Self {
        Self {
            tip: Mutex::new(ChainTip {
                hash: tip_hash.to_string(),
                height: tip_height,
            }),
            submitted_headers: Mutex::new(Vec::new()),
            deposits: Mutex::new(Vec::new()),
            withdraws: Mutex::new(Vec::new()),
            signing_requests: Mutex::new(Vec::new()),
            signatures: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
        }
    }

    fn push_signing_request(&self, request: BitcoinSigningRequest) {
        self.signing_requests.lock().unwrap().push(request);
    }
}

#[async_trait]
impl SideBridge for MockSide {
    async fn query_chain_tip(&self) -> Result<ChainTip, SideError> {
        Ok(self.tip.lock().unwrap().clone())
    }

    async fn query_params(&self) -> Result<Params, SideError> {
        Ok(Params::default())
    }

    async fn query_signing_requests(
        &self,
        status: SigningStatus,
    ) -> Result<Vec<BitcoinSigningRequest>, SideError> {
        Ok(self
            .signing_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == status as i32)
            .cloned()
            .collect())
    }

    async fn query_block_header_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<proto::BlockHeader>, SideError> {
        Ok(self
            .submitted_headers
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.hash == hash)
            .cloned())
    }

    async fn submit_block_headers(
        &self,
        headers: Vec<proto::BlockHeader>,
    ) -> Result<(), SideError> {
        // The sidechain has instant finality: its tip follows accepted
        // headers immediately.
        let mut submitted = self.submitted_headers.lock().unwrap();
        for header in headers {
            *self.tip.lock().unwrap() = ChainTip {
                hash: header.hash.clone(),
                height: header.height,
            };
            submitted.push(header);
        }
        Ok(())
    }

    async fn submit_deposit_tx(
        &self,
        blockhash: String,
        prev_tx_bytes: String,
        tx_bytes: String,
        proof: Vec<String>,
    ) -> Result<(), SideError> {
        self.deposits
            .lock()
            .unwrap()
            .push(proto::MsgSubmitDepositTransactionRequest {
                sender: String::new(),
                blockhash,
                prev_tx_bytes,
                tx_bytes,
                proof,
            });
        Ok(())
    }

    async fn submit_withdraw_tx(
        &self,
        blockhash: String,
        tx_bytes: String,
        proof: Vec<String>,
    ) -> Result<(), SideError> {
        self.withdraws
            .lock()
            .unwrap()
            .push(proto::MsgSubmitWithdrawTransactionRequest {
                sender: String::new(),
                blockhash,
                tx_bytes,
                proof,
            });
        Ok(())
    }

    async fn submit_withdraw_signatures(
        &self,
        txid: String,
        psbt: String,
    ) -> Result<(), SideError> {
        self.signatures.lock().unwrap().push((txid, psbt));
        Ok(())
    }

    async fn submit_withdraw_status(
        &self,
        txid: String,
        status: SigningStatus,
    ) -> Result<(), SideError> {
        self.statuses.lock().unwrap().push((txid, status as i32));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn scanner_params() -> Params {
    Params {
        authorized_relayers: vec![],
        confirmations: 6,
        max_acceptable_block_depth: 100,
        btc_voucher_denom: "sat".to_string(),
        vaults: vec![],
    }
}

/// A follower over a mock chain where the sidechain tip is `h100` at 100
/// and Bitcoin best is `h103`, fast-synced to the tip.
async fn synced_follower() -> (Arc<MockBitcoin>, Arc<MockSide>, HeaderFollower) {
    let btc = Arc::new(MockBitcoin::default());
    let side = Arc::new(MockSide::new("h100", 100));

    btc.add_header(100, "h100", "h99");
    btc.add_header(101, "h101", "h100");
    btc.add_header(102, "h102", "h101");
    btc.add_header(103, "h103", "h102");
    btc.set_best("h103");

    let scanner = VaultScanner::new(
        btc.clone() as Arc<dyn BitcoinReader>,
        side.clone() as Arc<dyn SideBridge>,
        scanner_params(),
        Network::Regtest,
    );
    let mut follower = HeaderFollower::new(
        btc.clone() as Arc<dyn BitcoinReader>,
        side.clone() as Arc<dyn SideBridge>,
        scanner,
    );

    follower.fast_sync().await.unwrap();
    (btc, side, follower)
}

/// Submitted headers must be strictly linked, except at reorg events
/// where the replacement is a sibling of the replaced header.
fn assert_linkage(headers: &[proto::BlockHeader]) {
    for pair in headers.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let extension = next.height == prev.height + 1 && next.previous_block_hash == prev.hash;
        let reorg = next.height == prev.height
            && next.previous_block_hash == prev.previous_block_hash;
        assert!(
            extension || reorg,
            "linkage broken between {} and {}",
            prev.hash,
            next.hash
        );
    }
}

fn p2wpkh_script(seed: u8) -> ScriptBuf {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
    let pk = CompressedPublicKey(sk.public_key(&secp));
    Address::p2wpkh(&pk, Network::Regtest).script_pubkey()
}

fn spend(prev: OutPoint, value: u64, script_pubkey: ScriptBuf) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: prev,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        }],
    }
}

fn fake_outpoint(seed: &[u8]) -> OutPoint {
    OutPoint::new(Txid::from_raw_hash(sha256d::Hash::hash(seed)), 0)
}

fn block_with(txdata: Vec<Transaction>) -> Block {
    let txids: Vec<Txid> = txdata.iter().map(|tx| tx.compute_txid()).collect();
    let merkle_root = merkle::merkle_root(&txids).unwrap();

    Block {
        header: BlockHeader {
            version: BlockVersion::TWO,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root,
            time: 0,
            bits: CompactTarget::from_consensus(0x1d00ffff),
            nonce: 0,
        },
        txdata,
    }
}

// ---------------------------------------------------------------------------
// Cold fast-sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cold_fast_sync() {
    let (_btc, side, follower) = synced_follower().await;

    let submitted = side.submitted_headers.lock().unwrap().clone();
    assert_eq!(submitted.len(), 3);
    assert_eq!(
        submitted.iter().map(|h| h.height).collect::<Vec<_>>(),
        vec![101, 102, 103]
    );
    assert_eq!(submitted[0].previous_block_hash, "h100");
    assert_linkage(&submitted);

    assert!(follower.state().synced);
    assert_eq!(
        follower.state().last_submitted.as_ref().unwrap().hash,
        "h103"
    );
}

// ---------------------------------------------------------------------------
// Live extension
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_extension() {
    let (btc, side, mut follower) = synced_follower().await;

    btc.add_header(104, "h104", "h103");
    btc.set_best("h104");
    follower.on_new_block("h104").await.unwrap();

    let submitted = side.submitted_headers.lock().unwrap().clone();
    assert_eq!(
        submitted.iter().map(|h| h.height).collect::<Vec<_>>(),
        vec![101, 102, 103, 104]
    );
    assert_linkage(&submitted);

    // Re-delivering the same hash is a no-op.
    follower.on_new_block("h104").await.unwrap();
    assert_eq!(side.submitted_headers.lock().unwrap().len(), 4);
}

// ---------------------------------------------------------------------------
// One-deep reorg
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_deep_reorg() {
    let (btc, side, mut follower) = synced_follower().await;

    btc.add_header(104, "h104", "h103");
    btc.set_best("h104");
    follower.on_new_block("h104").await.unwrap();

    // A sibling of 104 arrives: replace and continue from it.
    btc.add_header(104, "h104p", "h103");
    btc.set_best("h104p");
    follower.on_new_block("h104p").await.unwrap();

    let submitted = side.submitted_headers.lock().unwrap().clone();
    assert_eq!(submitted.last().unwrap().hash, "h104p");
    assert_linkage(&submitted);
    assert_eq!(
        follower.state().last_submitted.as_ref().unwrap().hash,
        "h104p"
    );

    // The follower keeps extending from the replacement.
    btc.add_header(105, "h105", "h104p");
    btc.set_best("h105");
    follower.on_new_block("h105").await.unwrap();
    assert_eq!(
        follower.state().last_submitted.as_ref().unwrap().hash,
        "h105"
    );
}

// ---------------------------------------------------------------------------
// Deeper reorgs abort
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deep_reorg_is_fatal() {
    let (btc, _side, mut follower) = synced_follower().await;

    // A header that neither extends nor is a sibling of the last one.
    btc.add_header(104, "h104x", "h102x");
    let err = follower.on_new_block("h104x").await.unwrap_err();
    assert!(err.is_fatal());
}

// ---------------------------------------------------------------------------
// Deposit detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deposit_detection() {
    let btc = Arc::new(MockBitcoin::default());
    let side = Arc::new(MockSide::new("b100", 100));

    let vault_script = p2wpkh_script(1);
    let vault_address =
        Address::from_script(&vault_script, Network::Regtest).unwrap().to_string();

    // Funding transaction held outside the block; its output 0 names the
    // deposit sender.
    let prev_tx = spend(fake_outpoint(b"funding"), 100_000, p2wpkh_script(7));
    btc.add_raw_tx(prev_tx.clone());

    let deposit_tx = spend(
        OutPoint::new(prev_tx.compute_txid(), 0),
        90_000,
        vault_script.clone(),
    );
    let filler_a = spend(fake_outpoint(b"filler a"), 10_000, p2wpkh_script(8));
    let filler_b = spend(fake_outpoint(b"filler b"), 20_000, p2wpkh_script(9));

    let block = block_with(vec![filler_a, deposit_tx.clone(), filler_b]);
    let merkle_root = block.header.merkle_root;
    btc.add_block(100, "b100", block);

    let mut params = scanner_params();
    params.vaults = vec![Vault {
        address: vault_address,
        pub_key: String::new(),
        asset_type: proto::AssetType::Btc as i32,
    }];

    let scanner = VaultScanner::new(
        btc.clone() as Arc<dyn BitcoinReader>,
        side.clone() as Arc<dyn SideBridge>,
        params,
        Network::Regtest,
    );

    // Current height 106, confirmations 6: scan block 100.
    scanner.scan(106).await.unwrap();

    let deposits = side.deposits.lock().unwrap().clone();
    assert_eq!(deposits.len(), 1);
    assert!(side.withdraws.lock().unwrap().is_empty());

    let deposit = &deposits[0];
    assert_eq!(deposit.blockhash, "b100");
    assert_eq!(
        deposit.tx_bytes,
        BASE64.encode(bitcoin::consensus::encode::serialize(&deposit_tx))
    );
    assert_eq!(
        deposit.prev_tx_bytes,
        BASE64.encode(bitcoin::consensus::encode::serialize(&prev_tx))
    );

    // The shipped proof verifies against the block header's merkle root.
    assert!(merkle::verify_proof(
        &deposit.proof,
        &deposit_tx.compute_txid(),
        &merkle_root
    ));
}

// ---------------------------------------------------------------------------
// Withdrawal detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn withdrawal_detection() {
    let btc = Arc::new(MockBitcoin::default());
    let side = Arc::new(MockSide::new("b100", 100));

    let secp = Secp256k1::new();
    let vault_sk = SecretKey::from_slice(&[3u8; 32]).unwrap();
    let vault_pk = vault_sk.public_key(&secp);

    // Spend from the vault: canonical P2WPKH witness [sig, pubkey].
    let mut withdrawal_tx = spend(fake_outpoint(b"vault utxo"), 40_000, p2wpkh_script(5));
    let mut witness = Witness::new();
    witness.push([0u8; 71]);
    witness.push(vault_pk.serialize());
    withdrawal_tx.input[0].witness = witness;

    let block = block_with(vec![withdrawal_tx.clone()]);
    btc.add_block(100, "b100", block);

    let mut params = scanner_params();
    params.vaults = vec![Vault {
        address: "bcrt1qunused".to_string(),
        pub_key: hex::encode(vault_pk.serialize()),
        asset_type: proto::AssetType::Btc as i32,
    }];

    let scanner = VaultScanner::new(
        btc.clone() as Arc<dyn BitcoinReader>,
        side.clone() as Arc<dyn SideBridge>,
        params,
        Network::Regtest,
    );
    scanner.scan(106).await.unwrap();

    let withdraws = side.withdraws.lock().unwrap().clone();
    assert_eq!(withdraws.len(), 1);
    assert_eq!(
        withdraws[0].tx_bytes,
        BASE64.encode(bitcoin::consensus::encode::serialize(&withdrawal_tx))
    );
}

// ---------------------------------------------------------------------------
// Co-sign then broadcast
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cosign_then_broadcast() {
    let btc = Arc::new(MockBitcoin::default());
    let side = Arc::new(MockSide::new("b100", 100));

    let dir = tempfile::tempdir().unwrap();
    let keyring = Keyring::open(dir.path());
    let key = keyring.create("vault1", TEST_MNEMONIC, KeyType::Segwit).unwrap();
    let vault_address = key.address(Network::Regtest);
    let vault_keys = Arc::new(
        VaultKeys::load(&keyring, &[vault_address.to_string()], Network::Regtest).unwrap(),
    );

    // The sidechain publishes a CREATED signing request for a PSBT with
    // one P2WPKH input owned by the vault.
    let unsigned = spend(fake_outpoint(b"vault deposit"), 49_000, p2wpkh_script(5));
    let mut packet = Psbt::from_unsigned_tx(unsigned).unwrap();
    packet.inputs[0].witness_utxo = Some(TxOut {
        value: Amount::from_sat(50_000),
        script_pubkey: vault_address.script_pubkey(),
    });
    let txid = packet.unsigned_tx.compute_txid().to_string();

    side.push_signing_request(BitcoinSigningRequest {
        address: String::new(),
        txid: txid.clone(),
        psbt: BASE64.encode(packet.serialize()),
        status: SigningStatus::Created as i32,
        sequence: 1,
        vault_address: vault_address.to_string(),
    });

    let processor = WithdrawalProcessor::new(
        btc.clone() as Arc<dyn BitcoinReader>,
        side.clone() as Arc<dyn SideBridge>,
        vault_keys,
        true,
    );

    processor.sign_pass().await;

    let signatures = side.signatures.lock().unwrap().clone();
    assert_eq!(signatures.len(), 1);
    assert_eq!(signatures[0].0, txid);

    let signed = Psbt::deserialize(&BASE64.decode(&signatures[0].1).unwrap()).unwrap();
    assert!(is_complete(&signed));

    // The sidechain flips the request to SIGNED with the submitted PSBT;
    // the broadcaster extracts and ships the final transaction.
    side.push_signing_request(BitcoinSigningRequest {
        address: String::new(),
        txid: txid.clone(),
        psbt: signatures[0].1.clone(),
        status: SigningStatus::Signed as i32,
        sequence: 1,
        vault_address: vault_address.to_string(),
    });

    processor.broadcast_pass().await;

    let broadcasts = btc.broadcasts.lock().unwrap().clone();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].compute_txid().to_string(), txid);
    assert_eq!(broadcasts[0].input[0].witness.len(), 2);

    let statuses = side.statuses.lock().unwrap().clone();
    assert_eq!(
        statuses,
        vec![(txid, SigningStatus::Broadcasted as i32)]
    );
}

// ---------------------------------------------------------------------------
// Unauthorized startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unauthorized_startup() {
    let params = Params {
        authorized_relayers: vec!["side1someoneelse".to_string()],
        confirmations: 6,
        max_acceptable_block_depth: 100,
        btc_voucher_denom: "sat".to_string(),
        vaults: vec![],
    };

    // Startup must refuse before any Bitcoin connection is opened.
    let err = authorize_sender(&params, "side1relayer").unwrap_err();
    assert!(matches!(err, RelayerError::Unauthorized(_)));

    assert!(authorize_sender(&params, "side1someoneelse").is_ok());
}
