//! Transactions as the block builder receives them: kernel-proven, with
//! their state effects already extracted.

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};

use crate::rollup_types::Proof;

/// Variables shared by every circuit of one block.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct GlobalVariables {
    pub chain_id: U256,
    pub version: U256,
    pub block_number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub gas_fees: GasFees,
}

/// Unit prices charged for the block's gas dimensions.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct GasFees {
    pub fee_per_da_gas: U256,
    pub fee_per_l2_gas: U256,
}

impl GlobalVariables {
    /// Hash binding the block to these variables. Every field is encoded
    /// as a 32-byte big-endian word, addresses left-padded.
    pub fn hash(&self) -> H256 {
        let mut word = [0u8; 32];
        let mut input = Vec::with_capacity(224);

        self.chain_id.to_big_endian(&mut word);
        input.extend_from_slice(&word);
        self.version.to_big_endian(&mut word);
        input.extend_from_slice(&word);
        U256::from(self.block_number).to_big_endian(&mut word);
        input.extend_from_slice(&word);
        U256::from(self.timestamp).to_big_endian(&mut word);
        input.extend_from_slice(&word);

        word = [0u8; 32];
        word[12..].copy_from_slice(self.coinbase.as_bytes());
        input.extend_from_slice(&word);

        self.gas_fees.fee_per_da_gas.to_big_endian(&mut word);
        input.extend_from_slice(&word);
        self.gas_fees.fee_per_l2_gas.to_big_endian(&mut word);
        input.extend_from_slice(&word);

        keccak(&input)
    }
}

/// Roots of the world state a transaction was proven against, identified
/// by the hash of the block that produced them.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct HistoricalTreeRoots {
    pub note_hash: H256,
    pub nullifier: H256,
    pub public_data: H256,
    pub l1_to_l2_messages: H256,
    /// Hash of the historical block; must be a leaf of the archive tree.
    pub block_hash: H256,
}

impl HistoricalTreeRoots {
    /// The content roots paired with a tree name, for validation reporting.
    pub fn named_roots(&self) -> [(&'static str, H256); 5] {
        [
            ("note_hash", self.note_hash),
            ("nullifier", self.nullifier),
            ("public_data", self.public_data),
            ("l1_to_l2_messages", self.l1_to_l2_messages),
            ("archive", self.block_hash),
        ]
    }
}

/// One write to the public data tree.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PublicDataWrite {
    /// Leaf index, i.e. the storage slot.
    pub leaf_slot: u64,
    pub new_value: H256,
}

/// A kernel-proven transaction with its extracted state effects.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProcessedTx {
    /// Transaction hash, as referenced by the block body.
    pub hash: H256,
    /// State the kernel proof was produced against.
    pub historical_roots: HistoricalTreeRoots,
    /// Note commitments to append to the note hash tree.
    pub new_commitments: Vec<H256>,
    /// Nullifiers to insert into the nullifier tree.
    pub new_nullifiers: Vec<U256>,
    /// Public storage writes, applied in order.
    pub public_data_writes: Vec<PublicDataWrite>,
    /// Public storage slots read during execution.
    pub public_data_reads: Vec<u64>,
    /// Messages pushed to L1.
    pub new_l2_to_l1_msgs: Vec<H256>,
    /// The kernel proof.
    pub proof: Proof,
}

impl ProcessedTx {
    /// A no-effect transaction against the given historical state, used to
    /// pad a block up to the next power-of-two transaction count.
    pub fn empty(historical_roots: HistoricalTreeRoots) -> Self {
        Self {
            hash: keccak(historical_roots.block_hash.as_bytes()),
            historical_roots,
            new_commitments: Vec::new(),
            new_nullifiers: Vec::new(),
            public_data_writes: Vec::new(),
            public_data_reads: Vec::new(),
            new_l2_to_l1_msgs: Vec::new(),
            proof: Proof::dummy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globals_hash_commits_to_every_field() {
        let base = GlobalVariables { block_number: 7, ..Default::default() };
        let mut other = base;
        other.timestamp = 1;
        assert_ne!(base.hash(), other.hash());

        let mut fees = base;
        fees.gas_fees.fee_per_l2_gas = 3.into();
        assert_ne!(base.hash(), fees.hash());
    }

    #[test]
    fn empty_txs_hash_from_their_historical_block() {
        let roots = HistoricalTreeRoots {
            block_hash: H256::repeat_byte(0xab),
            ..Default::default()
        };
        let tx = ProcessedTx::empty(roots);
        assert!(tx.new_commitments.is_empty());
        assert_eq!(tx.hash, ProcessedTx::empty(roots).hash);
    }
}
