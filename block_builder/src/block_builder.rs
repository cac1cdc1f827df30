//! Drives the base/merge/root rollup pipeline over the world state.
//!
//! Every block follows the same shape: each transaction pair is absorbed
//! by a base rollup circuit, adjacent outputs are folded pairwise by merge
//! circuits until two remain, and the root circuit finalizes the block.
//! The builder applies each circuit's state transition to the tree
//! database first and then cross-checks the simulated outputs against the
//! trees it actually computed; any divergence aborts the block and rolls
//! the world state back.

use std::sync::Arc;

use ethereum_types::{H256, U256};
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info};

use merkle_tree::{MembershipWitness, TreeSnapshot};
use world_state::constants::{
    L1_TO_L2_MSG_SUBTREE_HEIGHT, MAX_NEW_COMMITMENTS_PER_TX, MAX_NEW_NULLIFIERS_PER_TX,
    MAX_PUBLIC_DATA_WRITES_PER_TX, NOTE_HASH_SUBTREE_HEIGHT, NULLIFIER_SUBTREE_HEIGHT,
    NUM_L1_TO_L2_MSGS_PER_BLOCK,
};
use world_state::{compute_block_hash, MerkleTreeDb, TreeId, WorldStateError};

use crate::processed_tx::{GlobalVariables, ProcessedTx};
use crate::rollup_types::{
    AssembledBlock, BaseOrMergeRollupOutputs, BaseRollupInputs, BlockStateSnapshots,
    ConstantRollupData, L2Block, MergeRollupInputs, PreviousRollupData, Proof, RootRollupInputs,
    RootRollupOutputs,
};
use crate::simulator::{RollupProver, RollupSimulator};

/// A block construction failure.
#[derive(Debug, Error)]
pub enum BlockBuilderError {
    /// The transaction count does not fit the binary circuit tree.
    #[error("cannot build a block from {0} txs; need a power of two of at least 4")]
    InvalidTxCount(usize),

    /// A transaction exceeds one of the per-transaction effect limits.
    #[error("tx {tx} carries {count} {effect}, over the limit of {max}")]
    TooManyTxEffects { tx: H256, effect: &'static str, count: usize, max: usize },

    /// A transaction was proven against a zero tree root.
    #[error("tx {tx} has a zero historical {tree} root")]
    MissingHistoricalRoot { tx: H256, tree: &'static str },

    /// A transaction's historical block is not in the archive.
    #[error("tx {tx} references historical block {block_hash}, which is not in the archive")]
    UnknownHistoricalBlock { tx: H256, block_hash: H256 },

    /// More messages than one block consumes.
    #[error("got {count} L1-to-L2 messages, the block fits {max}")]
    TooManyL1ToL2Messages { count: usize, max: usize },

    /// A simulated end snapshot does not match the tree the builder built.
    #[error("simulated {tree} tree state {simulated:?} diverges from the computed state {computed:?}")]
    Consistency { tree: TreeId, simulated: TreeSnapshot, computed: TreeSnapshot },

    /// A simulated end root does not match the tree the builder built.
    #[error("simulated {tree} tree root {simulated} diverges from the computed root {computed}")]
    RootConsistency { tree: TreeId, simulated: H256, computed: H256 },

    /// The root circuit disagrees on the block's identity.
    #[error("simulated block hash {simulated} diverges from the computed hash {computed}")]
    BlockHashMismatch { simulated: H256, computed: H256 },

    /// The world state failed.
    #[error(transparent)]
    WorldState(#[from] WorldStateError),

    /// A simulator or prover backend failed.
    #[error("circuit simulation or proving failed: {0}")]
    Circuit(#[from] anyhow::Error),
}

/// Alias for the result of block building operations.
pub type BlockBuilderResult<T> = Result<T, BlockBuilderError>;

/// Builds proven L2 blocks against a [`MerkleTreeDb`].
pub struct BlockBuilder<S, P> {
    db: Arc<MerkleTreeDb>,
    simulator: S,
    prover: P,
}

impl<S: RollupSimulator, P: RollupProver> BlockBuilder<S, P> {
    pub fn new(db: Arc<MerkleTreeDb>, simulator: S, prover: P) -> Self {
        Self { db, simulator, prover }
    }

    /// Builds and proves one block.
    ///
    /// On success the world state workspace holds the block's uncommitted
    /// state transition; the caller commits it once the block is published,
    /// or rolls it back to discard the block. On any failure the transition
    /// is rolled back here and the trees are left at the previous block
    /// boundary.
    pub async fn build_block(
        &self,
        globals: GlobalVariables,
        txs: Vec<ProcessedTx>,
        l1_to_l2_messages: Vec<H256>,
    ) -> BlockBuilderResult<AssembledBlock> {
        match self.try_build(globals, &txs, l1_to_l2_messages).await {
            Ok(assembled) => {
                info!(
                    block_number = assembled.block.number,
                    block_hash = %assembled.block.block_hash,
                    "block assembled, transition pending commit"
                );
                Ok(assembled)
            }
            Err(err) => {
                self.db.rollback().await;
                Err(err)
            }
        }
    }

    async fn try_build(
        &self,
        globals: GlobalVariables,
        txs: &[ProcessedTx],
        mut messages: Vec<H256>,
    ) -> BlockBuilderResult<AssembledBlock> {
        if txs.len() < 4 || !txs.len().is_power_of_two() {
            return Err(BlockBuilderError::InvalidTxCount(txs.len()));
        }
        if messages.len() > NUM_L1_TO_L2_MSGS_PER_BLOCK {
            return Err(BlockBuilderError::TooManyL1ToL2Messages {
                count: messages.len(),
                max: NUM_L1_TO_L2_MSGS_PER_BLOCK,
            });
        }
        messages.resize(NUM_L1_TO_L2_MSGS_PER_BLOCK, H256::zero());

        let archive_witnesses = self.validate_txs(txs).await?;
        let start = self.state_snapshots().await;
        let constants = ConstantRollupData { start_archive_snapshot: start.archive, globals };

        info!(block_number = globals.block_number, tx_count = txs.len(), "building block");

        let mut layer = Vec::with_capacity(txs.len() / 2);
        for (i, pair) in txs.chunks_exact(2).enumerate() {
            let witnesses =
                [archive_witnesses[2 * i].clone(), archive_witnesses[2 * i + 1].clone()];
            layer.push(self.process_base(&constants, pair, witnesses).await?);
        }

        while layer.len() > 2 {
            let mut next = Vec::with_capacity(layer.len() / 2);
            for (left, right) in layer.into_iter().tuples() {
                next.push(self.process_merge(left, right).await?);
            }
            layer = next;
        }
        let previous: [PreviousRollupData; 2] = layer
            .try_into()
            .map_err(|_| BlockBuilderError::InvalidTxCount(txs.len()))?;

        let (outputs, proof) = self.process_root(&constants, previous, messages.clone()).await?;

        let end = self.state_snapshots().await;
        let block = L2Block {
            number: globals.block_number,
            global_variables: globals,
            start,
            end,
            tx_hashes: txs.iter().map(|tx| tx.hash).collect(),
            new_commitments: txs
                .iter()
                .flat_map(|tx| tx.new_commitments.iter().copied())
                .collect(),
            new_nullifiers: txs
                .iter()
                .flat_map(|tx| tx.new_nullifiers.iter().copied())
                .collect(),
            new_public_data_writes: txs
                .iter()
                .flat_map(|tx| tx.public_data_writes.iter().copied())
                .collect(),
            new_l2_to_l1_msgs: txs
                .iter()
                .flat_map(|tx| tx.new_l2_to_l1_msgs.iter().copied())
                .collect(),
            new_l1_to_l2_messages: messages,
            block_hash: outputs.block_hash,
            calldata_hash: outputs.calldata_hash,
        };
        Ok(AssembledBlock { block, proof })
    }

    /// Checks every transaction's effect limits and historical state
    /// claims, returning an archive membership witness per transaction.
    async fn validate_txs(
        &self,
        txs: &[ProcessedTx],
    ) -> BlockBuilderResult<Vec<MembershipWitness>> {
        let mut witnesses = Vec::with_capacity(txs.len());
        for tx in txs {
            let limits = [
                ("commitments", tx.new_commitments.len(), MAX_NEW_COMMITMENTS_PER_TX),
                ("nullifiers", tx.new_nullifiers.len(), MAX_NEW_NULLIFIERS_PER_TX),
                (
                    "public data writes",
                    tx.public_data_writes.len(),
                    MAX_PUBLIC_DATA_WRITES_PER_TX,
                ),
            ];
            for (effect, count, max) in limits {
                if count > max {
                    return Err(BlockBuilderError::TooManyTxEffects {
                        tx: tx.hash,
                        effect,
                        count,
                        max,
                    });
                }
            }

            for (tree, root) in tx.historical_roots.named_roots() {
                if root.is_zero() {
                    return Err(BlockBuilderError::MissingHistoricalRoot { tx: tx.hash, tree });
                }
            }

            let block_hash = tx.historical_roots.block_hash;
            let leaf_index = self
                .db
                .find_leaf_index(TreeId::Archive, block_hash, true)
                .await?
                .ok_or(BlockBuilderError::UnknownHistoricalBlock { tx: tx.hash, block_hash })?;
            let sibling_path = self.db.get_sibling_path(TreeId::Archive, leaf_index, true).await?;
            witnesses.push(MembershipWitness { leaf_index, sibling_path });
        }
        Ok(witnesses)
    }

    /// Applies one transaction pair to the trees and runs its base rollup.
    async fn process_base(
        &self,
        constants: &ConstantRollupData,
        pair: &[ProcessedTx],
        archive_membership_witnesses: [MembershipWitness; 2],
    ) -> BlockBuilderResult<PreviousRollupData> {
        let db = &self.db;

        let start_note_hash_snapshot = db.get_snapshot(TreeId::NoteHash, true).await;
        let start_nullifier_snapshot = db.get_snapshot(TreeId::Nullifier, true).await;
        let start_public_data_root = db.tree_roots(true).await.public_data;

        // Append witnesses are taken against the pre-insertion state.
        let note_hash_subtree_sibling_path = db
            .get_subtree_sibling_path(TreeId::NoteHash, NOTE_HASH_SUBTREE_HEIGHT, true)
            .await?;
        let commitments: Vec<H256> =
            pair.iter().flat_map(|tx| tx.new_commitments.iter().copied()).collect();
        db.append_leaves(TreeId::NoteHash, &commitments).await?;

        let mut public_data_read_paths = Vec::new();
        let mut public_data_update_paths = Vec::new();
        for tx in pair {
            for &slot in &tx.public_data_reads {
                public_data_read_paths
                    .push(db.get_sibling_path(TreeId::PublicData, slot, true).await?);
            }
            for write in &tx.public_data_writes {
                db.update_leaf(TreeId::PublicData, write.new_value, write.leaf_slot).await?;
                public_data_update_paths
                    .push(db.get_sibling_path(TreeId::PublicData, write.leaf_slot, true).await?);
            }
        }

        let nullifiers: Vec<U256> =
            pair.iter().flat_map(|tx| tx.new_nullifiers.iter().copied()).collect();
        let insertion = db.batch_insert(&nullifiers, NULLIFIER_SUBTREE_HEIGHT).await?;

        let inputs = BaseRollupInputs {
            constants: constants.clone(),
            txs: [pair[0].clone(), pair[1].clone()],
            start_note_hash_snapshot,
            start_nullifier_snapshot,
            start_public_data_root,
            note_hash_subtree_sibling_path,
            nullifier_subtree_sibling_path: insertion.subtree_sibling_path,
            low_leaf_witnesses: insertion.low_leaf_witnesses,
            sorted_nullifiers: insertion.sorted_leaves,
            sorted_nullifier_indexes: insertion.sorted_indexes,
            public_data_read_paths,
            public_data_update_paths,
            archive_membership_witnesses,
        };

        let outputs = self.simulator.base_rollup(&inputs).await?;
        self.check_base_outputs(&outputs).await?;
        debug!(left = %inputs.txs[0].hash, right = %inputs.txs[1].hash, "base rollup checked");

        let proof = self.prover.prove_base(&inputs, &outputs).await?;
        Ok(PreviousRollupData { outputs, proof })
    }

    async fn process_merge(
        &self,
        left: PreviousRollupData,
        right: PreviousRollupData,
    ) -> BlockBuilderResult<PreviousRollupData> {
        let inputs = MergeRollupInputs { previous: [left, right] };
        let outputs = self.simulator.merge_rollup(&inputs).await?;
        let proof = self.prover.prove_merge(&inputs, &outputs).await?;
        Ok(PreviousRollupData { outputs, proof })
    }

    /// Applies the block-level tree updates and runs the root rollup.
    async fn process_root(
        &self,
        constants: &ConstantRollupData,
        previous: [PreviousRollupData; 2],
        l1_to_l2_messages: Vec<H256>,
    ) -> BlockBuilderResult<(RootRollupOutputs, Proof)> {
        let db = &self.db;

        let start_l1_to_l2_snapshot = db.get_snapshot(TreeId::L1ToL2Messages, true).await;
        let l1_to_l2_subtree_sibling_path = db
            .get_subtree_sibling_path(TreeId::L1ToL2Messages, L1_TO_L2_MSG_SUBTREE_HEIGHT, true)
            .await?;
        db.append_leaves(TreeId::L1ToL2Messages, &l1_to_l2_messages).await?;

        let new_archive_sibling_path =
            db.get_subtree_sibling_path(TreeId::Archive, 0, true).await?;

        // The block hash covers the content roots after every tree update.
        let roots = db.tree_roots(true).await;
        let block_hash = compute_block_hash(
            constants.globals.hash(),
            roots.note_hash,
            roots.nullifier,
            roots.public_data,
            roots.l1_to_l2_messages,
        );
        db.append_leaves(TreeId::Archive, &[block_hash]).await?;

        let inputs = RootRollupInputs {
            previous,
            l1_to_l2_messages,
            l1_to_l2_subtree_sibling_path,
            start_l1_to_l2_snapshot,
            start_archive_snapshot: constants.start_archive_snapshot,
            new_archive_sibling_path,
        };
        let outputs = self.simulator.root_rollup(&inputs).await?;

        self.check_base_level_state(
            outputs.end_note_hash_snapshot,
            outputs.end_nullifier_snapshot,
            outputs.end_public_data_root,
        )
        .await?;
        ensure_consistent(
            TreeId::L1ToL2Messages,
            outputs.end_l1_to_l2_snapshot,
            db.get_snapshot(TreeId::L1ToL2Messages, true).await,
        )?;
        ensure_consistent(
            TreeId::Archive,
            outputs.end_archive_snapshot,
            db.get_snapshot(TreeId::Archive, true).await,
        )?;
        if outputs.block_hash != block_hash {
            return Err(BlockBuilderError::BlockHashMismatch {
                simulated: outputs.block_hash,
                computed: block_hash,
            });
        }
        debug!(%block_hash, "root rollup checked");

        let proof = self.prover.prove_root(&inputs, &outputs).await?;
        Ok((outputs, proof))
    }

    async fn check_base_outputs(
        &self,
        outputs: &BaseOrMergeRollupOutputs,
    ) -> BlockBuilderResult<()> {
        self.check_base_level_state(
            outputs.end_note_hash_snapshot,
            outputs.end_nullifier_snapshot,
            outputs.end_public_data_root,
        )
        .await
    }

    async fn check_base_level_state(
        &self,
        note_hash: TreeSnapshot,
        nullifier: TreeSnapshot,
        public_data_root: H256,
    ) -> BlockBuilderResult<()> {
        let db = &self.db;
        ensure_consistent(TreeId::NoteHash, note_hash, db.get_snapshot(TreeId::NoteHash, true).await)?;
        ensure_consistent(
            TreeId::Nullifier,
            nullifier,
            db.get_snapshot(TreeId::Nullifier, true).await,
        )?;
        let computed = db.tree_roots(true).await.public_data;
        if public_data_root != computed {
            return Err(BlockBuilderError::RootConsistency {
                tree: TreeId::PublicData,
                simulated: public_data_root,
                computed,
            });
        }
        Ok(())
    }

    async fn state_snapshots(&self) -> BlockStateSnapshots {
        BlockStateSnapshots {
            note_hash: self.db.get_snapshot(TreeId::NoteHash, true).await,
            nullifier: self.db.get_snapshot(TreeId::Nullifier, true).await,
            public_data_root: self.db.tree_roots(true).await.public_data,
            l1_to_l2_messages: self.db.get_snapshot(TreeId::L1ToL2Messages, true).await,
            archive: self.db.get_snapshot(TreeId::Archive, true).await,
        }
    }
}

fn ensure_consistent(
    tree: TreeId,
    simulated: TreeSnapshot,
    computed: TreeSnapshot,
) -> BlockBuilderResult<()> {
    if simulated != computed {
        return Err(BlockBuilderError::Consistency { tree, simulated, computed });
    }
    Ok(())
}
