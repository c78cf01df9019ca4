//! Merkle inclusion proofs for staking transactions, checked against the
//! headers tracked by the light client.

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Transaction, Txid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::ChainSnapshot;
use crate::error::{Error, Result};
use crate::light_client::BtcLightClient;

/// Position of a transaction in a block plus the sibling hashes on its path
/// to the merkle root, concatenated leaf-first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub block_hash: BlockHash,
    pub index: u32,
    pub proof: Vec<u8>,
}

impl InclusionProof {
    /// Builds the proof for `target` in a block containing `txids`, in block
    /// order.
    pub fn create(block_hash: BlockHash, txids: &[Txid], target: Txid) -> Option<Self> {
        let index = txids.iter().position(|txid| *txid == target)? as u32;
        Some(Self {
            block_hash,
            index,
            proof: create_proof(txids, index),
        })
    }

    /// Computes the merkle root committed to by this proof for `txid`.
    pub fn merkle_root(&self, txid: Txid) -> Result<[u8; 32]> {
        if self.proof.len() % 32 != 0 {
            return Err(Error::ProofInvalid(format!(
                "proof length {} is not a multiple of 32",
                self.proof.len()
            )));
        }

        let mut current = txid.into_inner();
        let mut index = self.index;
        for sibling in self.proof.chunks(32) {
            current = if index & 1 == 1 {
                tree_hash(sibling, &current)
            } else {
                tree_hash(&current, sibling)
            };
            index >>= 1;
        }

        if index != 0 {
            return Err(Error::ProofInvalid(format!(
                "index {} is out of range for a proof of depth {}",
                self.index,
                self.proof.len() / 32
            )));
        }

        Ok(current)
    }
}

fn tree_hash(left: &[u8], right: &[u8]) -> [u8; 32] {
    let mut first = Sha256::new();
    first.update(left);
    first.update(right);

    let mut second = Sha256::new();
    second.update(first.finalize());
    second.finalize().into()
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| tree_hash(&pair[0], pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

/// Computes the merkle root of a block's transactions, duplicating the last
/// node of odd-sized levels.
pub fn merkle_root(txids: &[Txid]) -> [u8; 32] {
    let mut level: Vec<_> = txids.iter().map(|txid| txid.into_inner()).collect();
    if level.is_empty() {
        return [0; 32];
    }
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

pub fn create_proof(txids: &[Txid], index: u32) -> Vec<u8> {
    let mut level: Vec<_> = txids.iter().map(|txid| txid.into_inner()).collect();
    let mut idx = index as usize;

    let mut proof_bytes = vec![];
    while level.len() > 1 {
        let sibling = level.get(idx ^ 1).unwrap_or(&level[idx]);
        proof_bytes.extend_from_slice(sibling);
        level = next_level(&level);
        idx >>= 1;
    }

    proof_bytes
}

/// Verifies that `tx` is included in a best-chain block at least `k` deep
/// whose height leaves more than `w` blocks of the staking timelock, and
/// returns that height.
pub fn verify_inclusion_proof_and_get_height(
    snapshot: &ChainSnapshot,
    light_client: &dyn BtcLightClient,
    tx: &Transaction,
    staking_time: u64,
    proof: &InclusionProof,
) -> Result<u64> {
    let header = light_client
        .header(&proof.block_hash)
        .ok_or_else(|| Error::HeaderUnknown(proof.block_hash.to_string()))?;

    if !light_client.is_on_best_chain(&proof.block_hash) || header.height > snapshot.tip_height
    {
        return Err(Error::NotOnBestChain(proof.block_hash.to_string()));
    }

    let root = proof.merkle_root(tx.txid())?;
    if root != header.header.merkle_root.into_inner() {
        return Err(Error::ProofInvalid(
            "merkle root does not match header".to_string(),
        ));
    }

    let depth = snapshot.tip_height - header.height;
    if depth < snapshot.k {
        return Err(Error::NotDeepEnough {
            k: snapshot.k,
            depth,
        });
    }

    if snapshot.tip_height + snapshot.w >= header.height + staking_time {
        return Err(Error::TimelockTooShort(snapshot.w));
    }

    Ok(header.height)
}
