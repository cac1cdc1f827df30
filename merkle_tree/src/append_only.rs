//! Append-only tree: leaves fill indices left to right and are never
//! overwritten once committed.

use std::sync::Arc;

use ethereum_types::H256;

use crate::hashing::{Keccak, TreeHasher};
use crate::store::TreeStore;
use crate::tree_base::{TreeBase, TreeError, TreeResult};
use crate::types::{SiblingPath, TreeSnapshot};

/// A fixed-height binary hash tree whose leaves are filled left to right.
#[derive(Debug)]
pub struct AppendOnlyTree<H: TreeHasher = Keccak> {
    base: TreeBase<H>,
}

impl<H: TreeHasher> AppendOnlyTree<H> {
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

    /// Appends leaves in order, recomputing the root incrementally.
    ///
    /// Fails with [`TreeError::CapacityExceeded`] if the resulting size would
    /// exceed `2^depth`; in that case no leaf is written.
    pub fn append_leaves(&mut self, leaves: &[H256]) -> TreeResult<()> {
        let start = self.base.size(true);
        let requested = start + leaves.len() as u64;
        if requested > self.base.capacity() {
            return Err(TreeError::CapacityExceeded {
                name: self.name().to_owned(),
                requested,
                capacity: self.base.capacity(),
            });
        }
        for (i, leaf) in leaves.iter().enumerate() {
            self.base.set_leaf(start + i as u64, *leaf)?;
        }
        self.base.set_size(requested);
        Ok(())
    }

    /// Root of the workspace (`include_uncommitted`) or committed view.
    pub fn get_root(&self, include_uncommitted: bool) -> H256 {
        self.base.root(include_uncommitted)
    }

    /// Number of leaves in the chosen view.
    pub fn num_leaves(&self, include_uncommitted: bool) -> u64 {
        self.base.size(include_uncommitted)
    }

    /// `(root, next free index)` of the chosen view.
    pub fn snapshot(&self, include_uncommitted: bool) -> TreeSnapshot {
        self.base.snapshot(include_uncommitted)
    }

    /// Hash of the leaf at `index` (the zero hash if never written).
    pub fn get_leaf(&self, index: u64, include_uncommitted: bool) -> TreeResult<H256> {
        self.base.node_hash(self.base.depth(), index, include_uncommitted)
    }

    /// Sibling path of the leaf at `index`.
    pub fn get_sibling_path(&self, index: u64, include_uncommitted: bool) -> TreeResult<SiblingPath> {
        self.base.sibling_path(index, include_uncommitted)
    }

    /// Sibling path of the next free slot, truncated above `subtree_height`.
    /// This is the insertion witness for appending a whole subtree.
    pub fn get_subtree_sibling_path(
        &self,
        subtree_height: usize,
        include_uncommitted: bool,
    ) -> TreeResult<SiblingPath> {
        let next = self.base.size(include_uncommitted);
        Ok(self.base.sibling_path(next, include_uncommitted)?.subtree_path(subtree_height))
    }

    /// Index of the first leaf holding `value`, scanning the chosen view.
    pub fn find_leaf_index(&self, value: &H256, include_uncommitted: bool) -> TreeResult<Option<u64>> {
        for index in 0..self.base.size(include_uncommitted) {
            if self.get_leaf(index, include_uncommitted)? == *value {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Makes the workspace state the new committed state.
    pub fn commit(&mut self) -> TreeResult<()> {
        self.base.commit()
    }

    /// Discards the workspace, restoring the last committed state.
    pub fn rollback(&mut self) {
        self.base.rollback()
    }

    pub(crate) fn base(&self) -> &TreeBase<H> {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut TreeBase<H> {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hashing::Keccak;
    use crate::store::MemoryTreeStore;

    fn new_tree(depth: usize) -> AppendOnlyTree<Keccak> {
        AppendOnlyTree::new(Arc::new(MemoryTreeStore::default()), "test", depth).unwrap()
    }

    fn leaf(n: u64) -> H256 {
        H256::from_low_u64_be(n)
    }

    #[test]
    fn batched_and_sequential_appends_agree() {
        let mut batched = new_tree(8);
        let mut sequential = new_tree(8);

        batched.append_leaves(&[leaf(1), leaf(2)]).unwrap();
        sequential.append_leaves(&[leaf(1)]).unwrap();
        sequential.append_leaves(&[leaf(2)]).unwrap();

        assert_eq!(batched.get_root(true), sequential.get_root(true));
        assert_eq!(batched.num_leaves(true), 2);
    }

    #[test]
    fn sibling_path_has_tree_height_and_recomputes_root() {
        let mut tree = new_tree(6);
        tree.append_leaves(&[leaf(10), leaf(11), leaf(12)]).unwrap();

        let path = tree.get_sibling_path(2, true).unwrap();
        assert_eq!(path.len(), 6);

        let mut current = leaf(12);
        let mut index = 2u64;
        for sibling in path.as_slice() {
            current = if index & 1 == 0 {
                Keccak::compress(&current, sibling)
            } else {
                Keccak::compress(sibling, &current)
            };
            index >>= 1;
        }
        assert_eq!(current, tree.get_root(true));
    }

    #[test]
    fn capacity_is_enforced_atomically() {
        let mut tree = new_tree(2);
        tree.append_leaves(&[leaf(1), leaf(2), leaf(3)]).unwrap();

        let err = tree.append_leaves(&[leaf(4), leaf(5)]).unwrap_err();
        assert!(matches!(err, TreeError::CapacityExceeded { requested: 5, capacity: 4, .. }));
        // The failed call must not have appended anything.
        assert_eq!(tree.num_leaves(true), 3);

        tree.append_leaves(&[leaf(4)]).unwrap();
        assert_eq!(tree.num_leaves(true), 4);
    }

    #[test]
    fn rollback_restores_the_committed_root() {
        let mut tree = new_tree(5);
        tree.append_leaves(&[leaf(1)]).unwrap();
        tree.commit().unwrap();
        let committed = tree.get_root(false);

        tree.append_leaves(&[leaf(2), leaf(3)]).unwrap();
        assert_ne!(tree.get_root(true), committed);

        tree.rollback();
        assert_eq!(tree.get_root(true), committed);
        assert_eq!(tree.get_root(false), committed);
        assert_eq!(tree.num_leaves(true), 1);
    }

    #[test]
    fn committed_state_survives_a_reload() {
        let store: Arc<MemoryTreeStore> = Arc::new(MemoryTreeStore::default());
        let root = {
            let mut tree =
                AppendOnlyTree::<Keccak>::new(store.clone(), "persisted", 6).unwrap();
            tree.append_leaves(&[leaf(7), leaf(8), leaf(9)]).unwrap();
            tree.commit().unwrap();
            tree.get_root(false)
        };

        let reloaded = AppendOnlyTree::<Keccak>::load(store, "persisted", 6).unwrap();
        assert_eq!(reloaded.get_root(false), root);
        assert_eq!(reloaded.num_leaves(false), 3);
        assert_eq!(reloaded.get_leaf(1, false).unwrap(), leaf(8));
    }

    #[test]
    fn committed_view_ignores_workspace_writes() {
        let mut tree = new_tree(4);
        tree.append_leaves(&[leaf(1)]).unwrap();
        tree.commit().unwrap();

        tree.append_leaves(&[leaf(2)]).unwrap();
        let committed_path = tree.get_sibling_path(0, false).unwrap();
        let workspace_path = tree.get_sibling_path(0, true).unwrap();
        assert_ne!(committed_path, workspace_path);
    }
}
