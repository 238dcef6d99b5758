//! Bitcoin Merkle Proof Generation
//!
//! Builds positional SPV proofs over a block's transaction list and
//! verifies them against a header's merkle root. Each proof step is the
//! base64 encoding of a position byte (0 = sibling is the right child,
//! 1 = sibling is the left child) followed by the sibling hash, or the
//! bare position byte when the sibling slot is empty (the duplicated-last
//! edge of Bitcoin's merkle tree).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{Txid, TxMerkleNode};
use thiserror::Error;

/// Merkle proof errors
#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("target transaction not found in block")]
    TargetNotFound,
}

/// Hash two merkle branches together (double SHA-256 of the concatenation).
fn hash_merkle_branches(left: &TxMerkleNode, right: &TxMerkleNode) -> TxMerkleNode {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(&left.to_byte_array());
    data[32..].copy_from_slice(&right.to_byte_array());
    TxMerkleNode::from_byte_array(sha256d::Hash::hash(&data).to_byte_array())
}

/// Width of layer 0 of the tree: the transaction count widened to the next
/// power of two.
fn tree_width(n_transactions: usize) -> usize {
    n_transactions.next_power_of_two()
}

/// Height of the tree: ceil(log2(n)).
fn tree_height(n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    (usize::BITS - (n - 1).leading_zeros()) as usize
}

/// Build the full merkle tree store. Leaves occupy the first `width` slots
/// (unused slots are `None`); each following region holds the next level.
/// A parent with an empty right sibling duplicates its left child.
fn build_tree_store(txids: &[Txid]) -> Vec<Option<TxMerkleNode>> {
    let width = tree_width(txids.len());
    let size = width * 2 - 1;
    let mut store: Vec<Option<TxMerkleNode>> = vec![None; size];

    for (i, txid) in txids.iter().enumerate() {
        store[i] = Some(TxMerkleNode::from_byte_array(txid.to_byte_array()));
    }

    let mut offset = width;
    let mut i = 0;
    while i < size - 1 {
        store[offset] = match (&store[i], &store[i + 1]) {
            (None, _) => None,
            (Some(left), None) => Some(hash_merkle_branches(left, left)),
            (Some(left), Some(right)) => Some(hash_merkle_branches(left, right)),
        };
        offset += 1;
        i += 2;
    }

    store
}

/// Merkle root of a transaction list. `None` for an empty list.
pub fn merkle_root(txids: &[Txid]) -> Option<TxMerkleNode> {
    if txids.is_empty() {
        return None;
    }
    let store = build_tree_store(txids);
    store.last().cloned().flatten()
}

/// Generate a merkle proof for `target` within `txids`, bottom-up.
///
/// A single-transaction block needs no proof: the txid is the root.
pub fn generate_proof(txids: &[Txid], target: &Txid) -> Result<Vec<String>, MerkleError> {
    let index = txids
        .iter()
        .position(|t| t == target)
        .ok_or(MerkleError::TargetNotFound)?;

    if txids.len() <= 1 {
        return Ok(Vec::new());
    }

    let store = build_tree_store(txids);
    let height = tree_height(txids.len());

    let mut proof = Vec::with_capacity(height);
    let mut index = index;
    let mut level_start = 0;
    let mut level_size = tree_width(txids.len());

    for _ in 0..height {
        let next_level_start = level_start + level_size;
        let (sibling_rel, position) = if index % 2 == 0 {
            (index + 1, 0u8)
        } else {
            (index - 1, 1u8)
        };

        let sibling_abs = level_start + sibling_rel;
        if sibling_abs < next_level_start {
            let mut bytes = vec![position];
            if let Some(sibling) = &store[sibling_abs] {
                bytes.extend_from_slice(&sibling.to_byte_array());
            }
            proof.push(BASE64.encode(bytes));
        }

        index /= 2;
        level_size /= 2;
        level_start = next_level_start;
    }

    Ok(proof)
}

/// Verify a merkle proof: fold from the leaf, choosing hash order by each
/// step's position byte, and compare the result with the root. Malformed
/// steps reject the proof.
pub fn verify_proof(proof: &[String], leaf: &Txid, root: &TxMerkleNode) -> bool {
    let mut current = TxMerkleNode::from_byte_array(leaf.to_byte_array());

    for step in proof {
        let Ok(bytes) = BASE64.decode(step) else {
            return false;
        };
        if bytes.is_empty() {
            return false;
        }

        let position = bytes[0];
        if position > 1 {
            return false;
        }

        let sibling = if bytes.len() > 1 {
            let Ok(raw) = <[u8; 32]>::try_from(&bytes[1..]) else {
                return false;
            };
            TxMerkleNode::from_byte_array(raw)
        } else {
            // Empty sibling slot: duplicate the running hash.
            current
        };

        current = if position == 0 {
            hash_merkle_branches(&current, &sibling)
        } else {
            hash_merkle_branches(&sibling, &current)
        };
    }

    current == *root
}
