//! Inputs and outputs of the three rollup circuit flavors, plus the
//! assembled block the pipeline produces.

use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};

use merkle_tree::{LowLeafWitness, MembershipWitness, SiblingPath, TreeSnapshot};

use crate::processed_tx::{GlobalVariables, ProcessedTx, PublicDataWrite};

/// An opaque proof blob as emitted by a prover backend.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Proof(pub Vec<u8>);

impl Proof {
    /// Placeholder proof for padding transactions and tests.
    pub fn dummy() -> Self {
        Self::default()
    }
}

/// Which circuit produced a rollup output.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RollupKind {
    Base,
    Merge,
    Root,
}

/// Data every circuit of one block agrees on.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConstantRollupData {
    /// Archive state all historical-root claims are checked against.
    pub start_archive_snapshot: TreeSnapshot,
    pub globals: GlobalVariables,
}

/// Everything a base rollup circuit needs to absorb one transaction pair.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BaseRollupInputs {
    pub constants: ConstantRollupData,
    /// The pair of transactions this base rollup absorbs.
    pub txs: [ProcessedTx; 2],

    pub start_note_hash_snapshot: TreeSnapshot,
    pub start_nullifier_snapshot: TreeSnapshot,
    pub start_public_data_root: H256,

    /// Witness for appending the pair's commitment subtree.
    pub note_hash_subtree_sibling_path: SiblingPath,
    /// Witness for appending the pair's nullifier subtree.
    pub nullifier_subtree_sibling_path: SiblingPath,
    /// Per-nullifier non-membership witnesses, ascending value order.
    pub low_leaf_witnesses: Vec<LowLeafWitness>,
    /// The pair's nullifiers in ascending order.
    pub sorted_nullifiers: Vec<U256>,
    /// Maps sorted order back to insertion (input) order.
    pub sorted_nullifier_indexes: Vec<usize>,

    /// One path per public data read, in tx order, taken before any of
    /// that tx's writes land.
    pub public_data_read_paths: Vec<SiblingPath>,
    /// One path per public data write, taken after the write.
    pub public_data_update_paths: Vec<SiblingPath>,

    /// Membership of each tx's historical block hash in the archive.
    pub archive_membership_witnesses: [MembershipWitness; 2],
}

/// Output shared by base and merge circuits, chaining start state to end
/// state across a contiguous transaction range.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BaseOrMergeRollupOutputs {
    pub rollup_type: RollupKind,
    /// Height of this node in the binary tree of rollup circuits; base
    /// outputs sit at height zero.
    pub height_in_block_tree: u32,
    pub constants: ConstantRollupData,

    pub start_note_hash_snapshot: TreeSnapshot,
    pub end_note_hash_snapshot: TreeSnapshot,
    pub start_nullifier_snapshot: TreeSnapshot,
    pub end_nullifier_snapshot: TreeSnapshot,
    pub start_public_data_root: H256,
    pub end_public_data_root: H256,

    /// Accumulated hash of the covered transactions' effects.
    pub txs_effects_hash: H256,
}

/// A proven lower-level rollup output, fed to the next level up.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PreviousRollupData {
    pub outputs: BaseOrMergeRollupOutputs,
    pub proof: Proof,
}

/// Inputs of a merge circuit: two adjacent proven rollups.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MergeRollupInputs {
    pub previous: [PreviousRollupData; 2],
}

/// Inputs of the root circuit, which finalizes the block.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RootRollupInputs {
    pub previous: [PreviousRollupData; 2],

    /// The block's L1-to-L2 messages, zero-padded to the fixed count.
    pub l1_to_l2_messages: Vec<H256>,
    /// Witness for appending the message subtree.
    pub l1_to_l2_subtree_sibling_path: SiblingPath,
    pub start_l1_to_l2_snapshot: TreeSnapshot,

    pub start_archive_snapshot: TreeSnapshot,
    /// Witness for appending the new block hash to the archive.
    pub new_archive_sibling_path: SiblingPath,
}

/// Output of the root circuit: the block's end state and identity.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RootRollupOutputs {
    pub end_note_hash_snapshot: TreeSnapshot,
    pub end_nullifier_snapshot: TreeSnapshot,
    pub end_public_data_root: H256,
    pub end_l1_to_l2_snapshot: TreeSnapshot,
    pub end_archive_snapshot: TreeSnapshot,

    /// Hash of the finalized block, the archive's newest leaf.
    pub block_hash: H256,
    /// Hash of the block's published calldata.
    pub calldata_hash: H256,
}

/// World state summary at a block boundary.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlockStateSnapshots {
    pub note_hash: TreeSnapshot,
    pub nullifier: TreeSnapshot,
    pub public_data_root: H256,
    pub l1_to_l2_messages: TreeSnapshot,
    pub archive: TreeSnapshot,
}

/// A finalized L2 block: state boundaries plus the flattened body.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct L2Block {
    pub number: u64,
    pub global_variables: GlobalVariables,
    pub start: BlockStateSnapshots,
    pub end: BlockStateSnapshots,
    pub tx_hashes: Vec<H256>,

    /// Every transaction's commitments, in tx order.
    pub new_commitments: Vec<H256>,
    /// Every transaction's nullifiers, in tx order.
    pub new_nullifiers: Vec<U256>,
    /// Every transaction's public data writes, in tx order.
    pub new_public_data_writes: Vec<PublicDataWrite>,
    /// Every transaction's L2-to-L1 messages, in tx order.
    pub new_l2_to_l1_msgs: Vec<H256>,
    /// The block's L1-to-L2 messages, zero-padded to the fixed count.
    pub new_l1_to_l2_messages: Vec<H256>,

    pub block_hash: H256,
    pub calldata_hash: H256,
}

/// A block together with the root proof attesting to it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AssembledBlock {
    pub block: L2Block,
    pub proof: Proof,
}
