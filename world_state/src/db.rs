//! The synchronized collection of state trees backing a rollup node.
//!
//! [`MerkleTreeDb`] owns all five trees behind one async mutex, so every
//! operation against the world state runs to completion before the next
//! one starts. Callers never observe a tree mid-update, and a commit or
//! rollback always covers a consistent cross-tree snapshot.

use std::fmt;
use std::sync::Arc;

use ethereum_types::H256;
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use merkle_tree::{
    AppendOnlyTree, BatchInsertionError, BatchInsertionResult, IndexedLeafPreimage, IndexedTree,
    Keccak, SiblingPath, SparseTree, TreeError, TreeHasher, TreeSnapshot, TreeStore,
};

use crate::constants::{
    ARCHIVE_TREE_HEIGHT, INITIAL_NULLIFIER_TREE_SIZE, L1_TO_L2_MSG_TREE_HEIGHT,
    NOTE_HASH_TREE_HEIGHT, NULLIFIER_TREE_HEIGHT, PUBLIC_DATA_TREE_HEIGHT,
};

/// A world state failure.
#[derive(Debug, Error)]
pub enum WorldStateError {
    /// The operation does not exist for this tree flavor.
    #[error("tree `{0}` does not support {1}")]
    UnsupportedTreeOperation(TreeId, &'static str),

    /// The underlying tree failed.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// A nullifier batch insertion failed.
    #[error(transparent)]
    BatchInsertion(#[from] BatchInsertionError),
}

/// Alias for the result of world state operations.
pub type WorldStateResult<T> = Result<T, WorldStateError>;

/// Identifies one of the five state trees.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum TreeId {
    /// Append-only tree of note commitments.
    NoteHash,
    /// Indexed tree of spent-note nullifiers.
    Nullifier,
    /// Sparse tree of public storage, keyed by slot.
    PublicData,
    /// Append-only tree of messages sent from L1.
    L1ToL2Messages,
    /// Append-only tree of historical block hashes.
    Archive,
}

impl TreeId {
    /// Every tree, in commit order.
    pub const ALL: [TreeId; 5] = [
        TreeId::NoteHash,
        TreeId::Nullifier,
        TreeId::PublicData,
        TreeId::L1ToL2Messages,
        TreeId::Archive,
    ];

    /// Stable name, used as the store key prefix.
    pub fn name(self) -> &'static str {
        match self {
            TreeId::NoteHash => "note_hash",
            TreeId::Nullifier => "nullifier",
            TreeId::PublicData => "public_data",
            TreeId::L1ToL2Messages => "l1_to_l2_messages",
            TreeId::Archive => "archive",
        }
    }

    /// Height of this tree.
    pub fn height(self) -> usize {
        match self {
            TreeId::NoteHash => NOTE_HASH_TREE_HEIGHT,
            TreeId::Nullifier => NULLIFIER_TREE_HEIGHT,
            TreeId::PublicData => PUBLIC_DATA_TREE_HEIGHT,
            TreeId::L1ToL2Messages => L1_TO_L2_MSG_TREE_HEIGHT,
            TreeId::Archive => ARCHIVE_TREE_HEIGHT,
        }
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity and shape of one tree at a point in time.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TreeInfo {
    /// Which tree this describes.
    pub tree_id: TreeId,
    /// Current root.
    pub root: H256,
    /// Number of occupied (for sparse, written) leaves.
    pub size: u64,
    /// Height of the tree.
    pub depth: usize,
}

/// Roots of every tree in one view of the world state.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TreeRoots {
    pub note_hash: H256,
    pub nullifier: H256,
    pub public_data: H256,
    pub l1_to_l2_messages: H256,
    pub archive: H256,
}

/// Hash committing to one block: its global variables and the roots of the
/// four content trees after the block's state transition.
pub fn compute_block_hash(
    globals_hash: H256,
    note_hash_root: H256,
    nullifier_root: H256,
    public_data_root: H256,
    l1_to_l2_messages_root: H256,
) -> H256 {
    let mut input = Vec::with_capacity(160);
    input.extend_from_slice(globals_hash.as_bytes());
    input.extend_from_slice(note_hash_root.as_bytes());
    input.extend_from_slice(nullifier_root.as_bytes());
    input.extend_from_slice(public_data_root.as_bytes());
    input.extend_from_slice(l1_to_l2_messages_root.as_bytes());
    keccak(&input)
}

struct Trees<H: TreeHasher> {
    note_hash: AppendOnlyTree<H>,
    nullifier: IndexedTree<H>,
    public_data: SparseTree<H>,
    l1_to_l2_messages: AppendOnlyTree<H>,
    archive: AppendOnlyTree<H>,
}

/// The world state: five trees behind one serializing lock.
pub struct MerkleTreeDb<H: TreeHasher = Keccak> {
    inner: Mutex<Trees<H>>,
}

impl<H: TreeHasher> MerkleTreeDb<H> {
    /// Creates a fresh world state on `store`: empty content trees, a
    /// prefilled nullifier tree, and the genesis block hash committed as
    /// the archive's first leaf.
    pub fn new(store: Arc<dyn TreeStore>) -> WorldStateResult<Self> {
        let mut trees = Trees {
            note_hash: AppendOnlyTree::new(
                store.clone(),
                TreeId::NoteHash.name(),
                NOTE_HASH_TREE_HEIGHT,
            )?,
            nullifier: IndexedTree::new(
                store.clone(),
                TreeId::Nullifier.name(),
                NULLIFIER_TREE_HEIGHT,
                INITIAL_NULLIFIER_TREE_SIZE,
            )?,
            public_data: SparseTree::new(
                store.clone(),
                TreeId::PublicData.name(),
                PUBLIC_DATA_TREE_HEIGHT,
            )?,
            l1_to_l2_messages: AppendOnlyTree::new(
                store.clone(),
                TreeId::L1ToL2Messages.name(),
                L1_TO_L2_MSG_TREE_HEIGHT,
            )?,
            archive: AppendOnlyTree::new(store, TreeId::Archive.name(), ARCHIVE_TREE_HEIGHT)?,
        };

        let genesis_hash = compute_block_hash(
            H256::zero(),
            trees.note_hash.get_root(true),
            trees.nullifier.get_root(true),
            trees.public_data.get_root(true),
            trees.l1_to_l2_messages.get_root(true),
        );
        trees.archive.append_leaves(&[genesis_hash])?;
        commit_all(&mut trees)?;
        debug!(%genesis_hash, "initialized world state");

        Ok(Self { inner: Mutex::new(trees) })
    }

    /// Restores a previously committed world state from `store`.
    pub fn load(store: Arc<dyn TreeStore>) -> WorldStateResult<Self> {
        let trees = Trees {
            note_hash: AppendOnlyTree::load(
                store.clone(),
                TreeId::NoteHash.name(),
                NOTE_HASH_TREE_HEIGHT,
            )?,
            nullifier: IndexedTree::load(
                store.clone(),
                TreeId::Nullifier.name(),
                NULLIFIER_TREE_HEIGHT,
            )?,
            public_data: SparseTree::load(
                store.clone(),
                TreeId::PublicData.name(),
                PUBLIC_DATA_TREE_HEIGHT,
            )?,
            l1_to_l2_messages: AppendOnlyTree::load(
                store.clone(),
                TreeId::L1ToL2Messages.name(),
                L1_TO_L2_MSG_TREE_HEIGHT,
            )?,
            archive: AppendOnlyTree::load(store, TreeId::Archive.name(), ARCHIVE_TREE_HEIGHT)?,
        };
        Ok(Self { inner: Mutex::new(trees) })
    }

    /// Root, size, and depth of a tree.
    pub async fn get_tree_info(&self, tree: TreeId, include_uncommitted: bool) -> TreeInfo {
        let snapshot = self.get_snapshot(tree, include_uncommitted).await;
        TreeInfo {
            tree_id: tree,
            root: snapshot.root,
            size: snapshot.next_available_leaf_index,
            depth: tree.height(),
        }
    }

    /// `(root, next free index)` of a tree.
    pub async fn get_snapshot(&self, tree: TreeId, include_uncommitted: bool) -> TreeSnapshot {
        let trees = self.inner.lock().await;
        match tree {
            TreeId::NoteHash => trees.note_hash.snapshot(include_uncommitted),
            TreeId::Nullifier => trees.nullifier.snapshot(include_uncommitted),
            TreeId::PublicData => trees.public_data.snapshot(include_uncommitted),
            TreeId::L1ToL2Messages => trees.l1_to_l2_messages.snapshot(include_uncommitted),
            TreeId::Archive => trees.archive.snapshot(include_uncommitted),
        }
    }

    /// Roots of all five trees in one consistent view.
    pub async fn tree_roots(&self, include_uncommitted: bool) -> TreeRoots {
        let trees = self.inner.lock().await;
        TreeRoots {
            note_hash: trees.note_hash.get_root(include_uncommitted),
            nullifier: trees.nullifier.get_root(include_uncommitted),
            public_data: trees.public_data.get_root(include_uncommitted),
            l1_to_l2_messages: trees.l1_to_l2_messages.get_root(include_uncommitted),
            archive: trees.archive.get_root(include_uncommitted),
        }
    }

    /// Sibling path of the leaf at `index`.
    pub async fn get_sibling_path(
        &self,
        tree: TreeId,
        index: u64,
        include_uncommitted: bool,
    ) -> WorldStateResult<SiblingPath> {
        let trees = self.inner.lock().await;
        let path = match tree {
            TreeId::NoteHash => trees.note_hash.get_sibling_path(index, include_uncommitted)?,
            TreeId::Nullifier => trees.nullifier.get_sibling_path(index, include_uncommitted)?,
            TreeId::PublicData => trees.public_data.get_sibling_path(index, include_uncommitted)?,
            TreeId::L1ToL2Messages => {
                trees.l1_to_l2_messages.get_sibling_path(index, include_uncommitted)?
            }
            TreeId::Archive => trees.archive.get_sibling_path(index, include_uncommitted)?,
        };
        Ok(path)
    }

    /// Sibling path of the next free subtree slot, for append-only trees.
    pub async fn get_subtree_sibling_path(
        &self,
        tree: TreeId,
        subtree_height: usize,
        include_uncommitted: bool,
    ) -> WorldStateResult<SiblingPath> {
        let trees = self.inner.lock().await;
        let path = match tree {
            TreeId::NoteHash => trees
                .note_hash
                .get_subtree_sibling_path(subtree_height, include_uncommitted)?,
            TreeId::Nullifier => trees
                .nullifier
                .get_subtree_sibling_path(subtree_height, include_uncommitted)?,
            TreeId::L1ToL2Messages => trees
                .l1_to_l2_messages
                .get_subtree_sibling_path(subtree_height, include_uncommitted)?,
            TreeId::Archive => trees
                .archive
                .get_subtree_sibling_path(subtree_height, include_uncommitted)?,
            TreeId::PublicData => {
                return Err(WorldStateError::UnsupportedTreeOperation(
                    tree,
                    "subtree sibling paths",
                ))
            }
        };
        Ok(path)
    }

    /// Appends `leaves` at the next free indices of an append-only tree.
    pub async fn append_leaves(&self, tree: TreeId, leaves: &[H256]) -> WorldStateResult<()> {
        let mut trees = self.inner.lock().await;
        match tree {
            TreeId::NoteHash => trees.note_hash.append_leaves(leaves)?,
            TreeId::L1ToL2Messages => trees.l1_to_l2_messages.append_leaves(leaves)?,
            TreeId::Archive => trees.archive.append_leaves(leaves)?,
            TreeId::Nullifier | TreeId::PublicData => {
                return Err(WorldStateError::UnsupportedTreeOperation(tree, "appending leaves"))
            }
        }
        Ok(())
    }

    /// Writes `value` at `index` of the public data tree.
    pub async fn update_leaf(
        &self,
        tree: TreeId,
        value: H256,
        index: u64,
    ) -> WorldStateResult<()> {
        let mut trees = self.inner.lock().await;
        match tree {
            TreeId::PublicData => trees.public_data.update_leaf(value, index)?,
            _ => return Err(WorldStateError::UnsupportedTreeOperation(tree, "in-place updates")),
        }
        Ok(())
    }

    /// Value of the leaf at `index`.
    ///
    /// `None` past the end of an append-only tree; sparse tree slots always
    /// read back, defaulting to zero.
    pub async fn get_leaf_value(
        &self,
        tree: TreeId,
        index: u64,
        include_uncommitted: bool,
    ) -> WorldStateResult<Option<H256>> {
        let trees = self.inner.lock().await;
        let value = match tree {
            TreeId::NoteHash => {
                bounded_leaf(&trees.note_hash, index, include_uncommitted)?
            }
            TreeId::PublicData => {
                Some(trees.public_data.get_leaf_value(index, include_uncommitted)?)
            }
            TreeId::L1ToL2Messages => {
                bounded_leaf(&trees.l1_to_l2_messages, index, include_uncommitted)?
            }
            TreeId::Archive => bounded_leaf(&trees.archive, index, include_uncommitted)?,
            TreeId::Nullifier => {
                return Err(WorldStateError::UnsupportedTreeOperation(tree, "raw leaf reads"))
            }
        };
        Ok(value)
    }

    /// Index of the first leaf holding `value`, scanning an append-only tree.
    pub async fn find_leaf_index(
        &self,
        tree: TreeId,
        value: H256,
        include_uncommitted: bool,
    ) -> WorldStateResult<Option<u64>> {
        let trees = self.inner.lock().await;
        let index = match tree {
            TreeId::NoteHash => trees.note_hash.find_leaf_index(&value, include_uncommitted)?,
            TreeId::L1ToL2Messages => {
                trees.l1_to_l2_messages.find_leaf_index(&value, include_uncommitted)?
            }
            TreeId::Archive => trees.archive.find_leaf_index(&value, include_uncommitted)?,
            TreeId::Nullifier | TreeId::PublicData => {
                return Err(WorldStateError::UnsupportedTreeOperation(tree, "leaf lookup"))
            }
        };
        Ok(index)
    }

    /// Batch-inserts nullifiers, returning the insertion witnesses.
    pub async fn batch_insert(
        &self,
        values: &[ethereum_types::U256],
        subtree_height: usize,
    ) -> WorldStateResult<BatchInsertionResult> {
        let mut trees = self.inner.lock().await;
        Ok(trees.nullifier.batch_insert(values, subtree_height)?)
    }

    /// Low-leaf lookup on the nullifier tree; see
    /// [`IndexedTree::get_previous_value_index`].
    pub async fn get_previous_value_index(
        &self,
        value: ethereum_types::U256,
        include_uncommitted: bool,
    ) -> Option<(u64, bool)> {
        let trees = self.inner.lock().await;
        trees.nullifier.get_previous_value_index(value, include_uncommitted)
    }

    /// Preimage of the nullifier leaf at `index`.
    pub async fn get_leaf_preimage(
        &self,
        index: u64,
        include_uncommitted: bool,
    ) -> Option<IndexedLeafPreimage> {
        let trees = self.inner.lock().await;
        trees.nullifier.get_leaf_preimage(index, include_uncommitted)
    }

    /// Commits the uncommitted state of every tree.
    pub async fn commit(&self) -> WorldStateResult<()> {
        let mut trees = self.inner.lock().await;
        commit_all(&mut trees)
    }

    /// Discards the uncommitted state of every tree.
    pub async fn rollback(&self) {
        let mut trees = self.inner.lock().await;
        trees.note_hash.rollback();
        trees.nullifier.rollback();
        trees.public_data.rollback();
        trees.l1_to_l2_messages.rollback();
        trees.archive.rollback();
    }
}

fn bounded_leaf<H: TreeHasher>(
    tree: &AppendOnlyTree<H>,
    index: u64,
    include_uncommitted: bool,
) -> WorldStateResult<Option<H256>> {
    if index >= tree.num_leaves(include_uncommitted) {
        return Ok(None);
    }
    Ok(Some(tree.get_leaf(index, include_uncommitted)?))
}

fn commit_all<H: TreeHasher>(trees: &mut Trees<H>) -> WorldStateResult<()> {
    trees.note_hash.commit()?;
    trees.nullifier.commit()?;
    trees.public_data.commit()?;
    trees.l1_to_l2_messages.commit()?;
    trees.archive.commit()?;
    Ok(())
}
