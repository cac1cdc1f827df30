//! Sparse, update-only tree for keyed state.
//!
//! Leaves live at slot indices derived outside the tree (a key hashed into
//! the index space) and are overwritten in place; no append ordering exists.

use std::sync::Arc;

use ethereum_types::H256;

use crate::hashing::{Keccak, TreeHasher};
use crate::store::TreeStore;
use crate::tree_base::{TreeBase, TreeResult};
use crate::types::{SiblingPath, TreeSnapshot};

/// A fixed-height tree whose leaves are addressed by slot and updated in
/// place.
#[derive(Debug)]
pub struct SparseTree<H: TreeHasher = Keccak> {
    base: TreeBase<H>,
}

impl<H: TreeHasher> SparseTree<H> {
    /// Creates a fresh, empty tree.
    pub fn new(store: Arc<dyn TreeStore>, name: &str, depth: usize) -> TreeResult<Self> {
        Ok(Self {
            base: TreeBase::new(store, name, depth)?,
        })
    }

    /// Restores a tree from its committed store state.
    pub fn load(store: Arc<dyn TreeStore>, name: &str, depth: usize) -> TreeResult<Self> {
        Ok(Self {
            base: TreeBase::load(store, name, depth)?,
        })
    }

    /// Tree name, as used for store keys.
    pub fn name(&self) -> &str {
        self.base.name()
    }

    /// Height of the tree.
    pub fn depth(&self) -> usize {
        self.base.depth()
    }

    /// Overwrites the leaf at `index` with `value`.
    ///
    /// The value is stored as the leaf hash directly; callers hash composite
    /// preimages themselves. Writing a previously empty slot grows the
    /// reported leaf count.
    pub fn update_leaf(&mut self, value: H256, index: u64) -> TreeResult<()> {
        let was_empty = self.base.node_hash(self.depth(), index, true)? == H256::zero();
        self.base.set_leaf(index, value)?;
        if was_empty && !value.is_zero() {
            let size = self.base.size(true) + 1;
            self.base.set_size(size);
        }
        Ok(())
    }

    /// Current value of the leaf at `index` (zero if never written).
    pub fn get_leaf_value(&self, index: u64, include_uncommitted: bool) -> TreeResult<H256> {
        self.base.node_hash(self.depth(), index, include_uncommitted)
    }

    /// Root of the workspace (`include_uncommitted`) or committed view.
    pub fn get_root(&self, include_uncommitted: bool) -> H256 {
        self.base.root(include_uncommitted)
    }

    /// Number of occupied slots in the chosen view.
    pub fn num_leaves(&self, include_uncommitted: bool) -> u64 {
        self.base.size(include_uncommitted)
    }

    /// `(root, occupied slots)` of the chosen view.
    pub fn snapshot(&self, include_uncommitted: bool) -> TreeSnapshot {
        self.base.snapshot(include_uncommitted)
    }

    /// Sibling path of the leaf at `index`.
    pub fn get_sibling_path(&self, index: u64, include_uncommitted: bool) -> TreeResult<SiblingPath> {
        self.base.sibling_path(index, include_uncommitted)
    }

    /// Makes the workspace state the new committed state.
    pub fn commit(&mut self) -> TreeResult<()> {
        self.base.commit()
    }

    /// Discards the workspace, restoring the last committed state.
    pub fn rollback(&mut self) {
        self.base.rollback()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hashing::Keccak;
    use crate::store::MemoryTreeStore;

    fn new_tree(depth: usize) -> SparseTree<Keccak> {
        SparseTree::new(Arc::new(MemoryTreeStore::default()), "sparse", depth).unwrap()
    }

    #[test]
    fn updates_are_in_place() {
        let mut tree = new_tree(10);
        let empty_root = tree.get_root(true);

        tree.update_leaf(H256::from_low_u64_be(1), 77).unwrap();
        let first_root = tree.get_root(true);
        assert_ne!(first_root, empty_root);
        assert_eq!(tree.num_leaves(true), 1);

        tree.update_leaf(H256::from_low_u64_be(2), 77).unwrap();
        assert_ne!(tree.get_root(true), first_root);
        assert_eq!(tree.num_leaves(true), 1);
        assert_eq!(tree.get_leaf_value(77, true).unwrap(), H256::from_low_u64_be(2));
    }

    #[test]
    fn slots_are_independent() {
        let mut left_first = new_tree(10);
        left_first.update_leaf(H256::from_low_u64_be(1), 3).unwrap();
        left_first.update_leaf(H256::from_low_u64_be(2), 900).unwrap();

        let mut right_first = new_tree(10);
        right_first.update_leaf(H256::from_low_u64_be(2), 900).unwrap();
        right_first.update_leaf(H256::from_low_u64_be(1), 3).unwrap();

        assert_eq!(left_first.get_root(true), right_first.get_root(true));
    }

    #[test]
    fn rollback_discards_updates() {
        let mut tree = new_tree(8);
        tree.update_leaf(H256::from_low_u64_be(5), 1).unwrap();
        tree.commit().unwrap();
        let committed = tree.get_root(false);

        tree.update_leaf(H256::from_low_u64_be(6), 1).unwrap();
        tree.rollback();

        assert_eq!(tree.get_root(true), committed);
        assert_eq!(tree.get_leaf_value(1, true).unwrap(), H256::from_low_u64_be(5));
    }

    #[test]
    fn reload_preserves_committed_slots() {
        let store: Arc<MemoryTreeStore> = Arc::new(MemoryTreeStore::default());
        let root = {
            let mut tree = SparseTree::<Keccak>::new(store.clone(), "pd", 12).unwrap();
            tree.update_leaf(H256::from_low_u64_be(42), 1000).unwrap();
            tree.commit().unwrap();
            tree.get_root(false)
        };

        let reloaded = SparseTree::<Keccak>::load(store, "pd", 12).unwrap();
        assert_eq!(reloaded.get_root(false), root);
        assert_eq!(
            reloaded.get_leaf_value(1000, false).unwrap(),
            H256::from_low_u64_be(42)
        );
    }
}
