//! Indexed tree: an append-only tree whose leaves form a sorted linked
//! list, enabling non-membership proofs and batched insertion.
//!
//! Leaves are an arena of `(value, next_value, next_index)` slots rather
//! than a pointer graph; index 0 holds the zero sentinel. Proving a value
//! `v` absent means exhibiting the "low leaf": the leaf with the largest
//! value below `v`, whose `next_value` lies above `v` (or is zero at the
//! list tail).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ethereum_types::{H256, U256};
use log::debug;
use thiserror::Error;

use crate::append_only::AppendOnlyTree;
use crate::hashing::{Keccak, TreeHasher};
use crate::store::{leaf_key, StorageError, TreeStore, WriteBatch};
use crate::tree_base::{TreeError, TreeResult};
use crate::types::{
    BatchInsertionResult, IndexedLeafPreimage, LowLeafWitness, SiblingPath, TreeSnapshot,
};

/// An error raised during a batched insertion.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum BatchInsertionError {
    /// The same non-zero value appeared twice in one batch.
    #[error("duplicate value {0} in batch")]
    DuplicateValue(U256),

    /// A batch value already has a leaf on the tree, so no non-membership
    /// witness can exist for it.
    #[error("value {0} is already present in the tree")]
    AlreadyPresent(U256),

    /// No predecessor leaf exists for a value on a populated tree; the
    /// zero sentinel is missing, which means the tree state is corrupted.
    #[error("no predecessor leaf found for value {0}: missing zero sentinel")]
    MissingPredecessor(U256),

    /// The low leaf was claimed inside the batch but no pending leaf
    /// straddles the value; only possible with corrupted list pointers.
    #[error("no batch-local predecessor found for value {0}: corrupted linked list")]
    BrokenPendingChain(U256),

    /// The underlying tree failed.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// An append-only tree whose leaf preimages form a sorted linked list.
#[derive(Debug)]
pub struct IndexedTree<H: TreeHasher = Keccak> {
    tree: AppendOnlyTree<H>,
    /// Committed preimages by leaf index.
    leaves: Vec<IndexedLeafPreimage>,
    /// Uncommitted preimage overlay.
    cached: HashMap<u64, IndexedLeafPreimage>,
    /// Committed `value -> leaf index`, used for predecessor queries.
    sorted: BTreeMap<U256, u64>,
    /// Uncommitted additions to the predecessor index.
    sorted_uncommitted: BTreeMap<U256, u64>,
}

impl<H: TreeHasher> IndexedTree<H> {
    /// Creates a fresh tree seeded with `prefilled_size` linked dummy leaves
    /// (values `0..prefilled_size`, each pointing at the next, the last
    /// pointing back at zero) and commits them.
    ///
    /// The first leaf is the zero sentinel; the extra padding leaves keep
    /// the first real batch aligned to a whole subtree slot.
    pub fn new(
        store: Arc<dyn TreeStore>,
        name: &str,
        depth: usize,
        prefilled_size: u64,
    ) -> TreeResult<Self> {
        assert!(prefilled_size >= 1, "indexed tree needs its zero sentinel");

        let mut tree = Self {
            tree: AppendOnlyTree::new(store, name, depth)?,
            leaves: Vec::new(),
            cached: HashMap::new(),
            sorted: BTreeMap::new(),
            sorted_uncommitted: BTreeMap::new(),
        };

        let mut prefill = Vec::with_capacity(prefilled_size as usize);
        for i in 0..prefilled_size {
            let last = i + 1 == prefilled_size;
            prefill.push(IndexedLeafPreimage {
                value: U256::from(i),
                next_value: if last { U256::zero() } else { U256::from(i + 1) },
                next_index: if last { 0 } else { i + 1 },
            });
        }
        tree.append_preimages(&prefill, true)?;
        // The sentinel's zero value is a real list node, not an empty slot.
        tree.sorted_uncommitted.insert(U256::zero(), 0);
        tree.commit()?;
        Ok(tree)
    }

    /// Restores a tree from its committed store state, rebuilding the
    /// in-memory leaf arena and predecessor index from the stored preimages.
    pub fn load(store: Arc<dyn TreeStore>, name: &str, depth: usize) -> TreeResult<Self> {
        let tree = AppendOnlyTree::load(store, name, depth)?;
        let size = tree.num_leaves(false);

        let mut leaves = Vec::with_capacity(size as usize);
        let mut sorted = BTreeMap::new();
        for index in 0..size {
            let key = leaf_key(tree.name(), index);
            let bytes = tree.base().store().get(&key)?.ok_or(StorageError::Corrupt {
                key: key.clone(),
                expected: 72,
                actual: 0,
            })?;
            let preimage = IndexedLeafPreimage::decode(&bytes).ok_or(StorageError::Corrupt {
                key,
                expected: 72,
                actual: bytes.len(),
            })?;
            if !preimage.value.is_zero() || index == 0 {
                sorted.insert(preimage.value, index);
            }
            leaves.push(preimage);
        }

        Ok(Self {
            tree,
            leaves,
            cached: HashMap::new(),
            sorted,
            sorted_uncommitted: BTreeMap::new(),
        })
    }

    /// Tree name, as used for store keys.
    pub fn name(&self) -> &str {
        self.tree.name()
    }

    /// Height of the tree.
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    /// Root of the workspace (`include_uncommitted`) or committed view.
    pub fn get_root(&self, include_uncommitted: bool) -> H256 {
        self.tree.get_root(include_uncommitted)
    }

    /// Number of leaves in the chosen view.
    pub fn num_leaves(&self, include_uncommitted: bool) -> u64 {
        self.tree.num_leaves(include_uncommitted)
    }

    /// `(root, next free index)` of the chosen view.
    pub fn snapshot(&self, include_uncommitted: bool) -> TreeSnapshot {
        self.tree.snapshot(include_uncommitted)
    }

    /// Sibling path of the leaf at `index`.
    pub fn get_sibling_path(&self, index: u64, include_uncommitted: bool) -> TreeResult<SiblingPath> {
        self.tree.get_sibling_path(index, include_uncommitted)
    }

    /// Sibling path of the next free slot, truncated above `subtree_height`.
    pub fn get_subtree_sibling_path(
        &self,
        subtree_height: usize,
        include_uncommitted: bool,
    ) -> TreeResult<SiblingPath> {
        self.tree.get_subtree_sibling_path(subtree_height, include_uncommitted)
    }

    /// Index of the leaf with the largest value at or below `value`, plus
    /// whether that leaf holds exactly `value`.
    ///
    /// `None` only on a tree with no sentinel, i.e. corrupted state.
    pub fn get_previous_value_index(
        &self,
        value: U256,
        include_uncommitted: bool,
    ) -> Option<(u64, bool)> {
        let committed = self.sorted.range(..=value).next_back();
        let best = if include_uncommitted {
            let pending = self.sorted_uncommitted.range(..=value).next_back();
            match (committed, pending) {
                (Some(c), Some(p)) => Some(if p.0 >= c.0 { p } else { c }),
                (c, p) => c.or(p),
            }
        } else {
            committed
        };
        best.map(|(v, index)| (*index, *v == value))
    }

    /// Preimage of the leaf at `index`, if it exists in the chosen view.
    pub fn get_leaf_preimage(
        &self,
        index: u64,
        include_uncommitted: bool,
    ) -> Option<IndexedLeafPreimage> {
        if include_uncommitted {
            if let Some(preimage) = self.cached.get(&index) {
                return Some(*preimage);
            }
        }
        self.leaves.get(index as usize).copied()
    }

    /// Inserts up to `n` new values as one subtree append, producing a
    /// non-membership witness for every non-zero value.
    ///
    /// Values are processed in ascending order. Each value's low leaf is
    /// looked up on the tree; if that leaf was already claimed as
    /// predecessor by a smaller value of this same batch, the true
    /// predecessor only exists in the pending subtree, so the new value is
    /// spliced between that pending leaf and its old successor and its
    /// witness is left empty, telling the verifier to derive the
    /// predecessor from batch-local data. Otherwise the low leaf's pointers
    /// are repointed at the new value's future index and a regular witness
    /// against the current (intermediate) root is emitted.
    ///
    /// New leaves land at `start + original position`, so callers that
    /// re-derive the insertion order need the returned permutation.
    pub fn batch_insert(
        &mut self,
        values: &[U256],
        subtree_height: usize,
    ) -> Result<BatchInsertionResult, BatchInsertionError> {
        let n = values.len();
        let depth = self.depth();
        let start_index = self.num_leaves(true);

        // Reject an over-full batch before any pointer mutation happens.
        let requested = start_index + n as u64;
        let capacity = 1u64 << depth;
        if requested > capacity {
            return Err(TreeError::CapacityExceeded {
                name: self.name().to_owned(),
                requested,
                capacity,
            }
            .into());
        }
        debug!(
            "tree `{}`: batch inserting {n} values at index {start_index}",
            self.name()
        );

        let mut sorted: Vec<(U256, usize)> =
            values.iter().copied().enumerate().map(|(i, v)| (v, i)).collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut witnesses = Vec::with_capacity(n);
        let mut pending = vec![IndexedLeafPreimage::empty(); n];
        // Tree leaves already repointed at a batch value, keyed by leaf
        // index; their on-tree witness material is stale for later values.
        let mut claimed: HashMap<u64, U256> = HashMap::new();

        for (pos, &(value, original_index)) in sorted.iter().enumerate() {
            if value.is_zero() {
                witnesses.push(LowLeafWitness::empty(depth));
                continue;
            }
            if pos > 0 && sorted[pos - 1].0 == value {
                return Err(BatchInsertionError::DuplicateValue(value));
            }

            let (low_index, already_present) = self
                .get_previous_value_index(value, true)
                .ok_or(BatchInsertionError::MissingPredecessor(value))?;
            if already_present {
                return Err(BatchInsertionError::AlreadyPresent(value));
            }

            let new_leaf_index = start_index + original_index as u64;

            if claimed.contains_key(&low_index) {
                // The true predecessor is pending in this batch: splice the
                // value between the pending leaf straddling it and that
                // leaf's old successor.
                let (old_next_value, old_next_index) = {
                    let splice = pending
                        .iter_mut()
                        .find(|p| {
                            !p.value.is_zero()
                                && p.value < value
                                && (p.next_value > value || p.next_value.is_zero())
                        })
                        .ok_or(BatchInsertionError::BrokenPendingChain(value))?;
                    let old = (splice.next_value, splice.next_index);
                    splice.next_value = value;
                    splice.next_index = new_leaf_index;
                    old
                };
                pending[original_index] = IndexedLeafPreimage {
                    value,
                    next_value: old_next_value,
                    next_index: old_next_index,
                };
                witnesses.push(LowLeafWitness::empty(depth));
            } else {
                let low = self
                    .get_leaf_preimage(low_index, true)
                    .ok_or(BatchInsertionError::MissingPredecessor(value))?;
                let sibling_path = self.tree.get_sibling_path(low_index, true)?;
                witnesses.push(LowLeafWitness {
                    preimage: low,
                    index: low_index,
                    sibling_path,
                });

                pending[original_index] = IndexedLeafPreimage {
                    value,
                    next_value: low.next_value,
                    next_index: low.next_index,
                };

                let repointed = IndexedLeafPreimage {
                    value: low.value,
                    next_value: value,
                    next_index: new_leaf_index,
                };
                self.update_preimage(low_index, repointed)?;
                claimed.insert(low_index, value);
            }
        }

        // Insertion witness for the whole subtree, taken before the append.
        let subtree_sibling_path = self.get_subtree_sibling_path(subtree_height, true)?;
        self.append_preimages(&pending, false)?;

        Ok(BatchInsertionResult {
            low_leaf_witnesses: witnesses,
            subtree_sibling_path,
            sorted_leaves: sorted.iter().map(|&(v, _)| v).collect(),
            sorted_indexes: sorted.iter().map(|&(_, i)| i).collect(),
        })
    }

    /// Makes the workspace state the new committed state, persisting every
    /// touched leaf preimage.
    pub fn commit(&mut self) -> TreeResult<()> {
        self.tree.commit()?;

        let mut batch = WriteBatch::default();
        for (&index, preimage) in &self.cached {
            batch.put(leaf_key(self.tree.name(), index), preimage.encode().to_vec());
        }
        self.tree.base().store().write_batch(batch)?;

        for (index, preimage) in self.cached.drain() {
            let index = index as usize;
            if self.leaves.len() <= index {
                self.leaves.resize(index + 1, IndexedLeafPreimage::empty());
            }
            self.leaves[index] = preimage;
        }
        let mut promoted = std::mem::take(&mut self.sorted_uncommitted);
        self.sorted.append(&mut promoted);
        Ok(())
    }

    /// Discards the workspace, restoring the last committed state.
    pub fn rollback(&mut self) {
        self.tree.rollback();
        self.cached.clear();
        self.sorted_uncommitted.clear();
    }

    /// Overwrites a leaf preimage in place and rehashes its path.
    fn update_preimage(&mut self, index: u64, preimage: IndexedLeafPreimage) -> TreeResult<()> {
        self.cached.insert(index, preimage);
        self.tree.base_mut().set_leaf(index, encode_leaf::<H>(&preimage, true))
    }

    /// Appends preimages at the next free indices.
    ///
    /// With `hash_zero_leaf` unset, zero-valued preimages are encoded as 32
    /// zero bytes instead of hashed: a batch insertion's unoccupied slots
    /// are forced null leaves, not real list nodes.
    fn append_preimages(
        &mut self,
        preimages: &[IndexedLeafPreimage],
        hash_zero_leaf: bool,
    ) -> TreeResult<()> {
        let start = self.num_leaves(true);
        let hashes: Vec<H256> = preimages
            .iter()
            .map(|p| encode_leaf::<H>(p, hash_zero_leaf))
            .collect();
        self.tree.append_leaves(&hashes)?;
        for (i, preimage) in preimages.iter().enumerate() {
            let index = start + i as u64;
            self.cached.insert(index, *preimage);
            if !preimage.value.is_zero() {
                self.sorted_uncommitted.insert(preimage.value, index);
            }
        }
        Ok(())
    }
}

/// Leaf hash of an indexed preimage.
fn encode_leaf<H: TreeHasher>(preimage: &IndexedLeafPreimage, hash_zero_leaf: bool) -> H256 {
    if !hash_zero_leaf && preimage.value.is_zero() {
        H256::zero()
    } else {
        H::hash(&preimage.to_hash_input())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::store::MemoryTreeStore;

    const DEPTH: usize = 8;

    fn new_tree(prefilled_size: u64) -> IndexedTree<Keccak> {
        let _ = pretty_env_logger::try_init();
        IndexedTree::new(
            Arc::new(MemoryTreeStore::default()),
            "nullifier",
            DEPTH,
            prefilled_size,
        )
        .unwrap()
    }

    fn v(n: u64) -> U256 {
        U256::from(n)
    }

    /// Walks the linked list from the sentinel, returning the visited
    /// values in list order (sentinel excluded).
    fn walk(tree: &IndexedTree<Keccak>) -> Vec<U256> {
        let mut values = Vec::new();
        let mut leaf = tree.get_leaf_preimage(0, true).unwrap();
        while leaf.next_index != 0 {
            leaf = tree.get_leaf_preimage(leaf.next_index, true).unwrap();
            values.push(leaf.value);
        }
        assert!(leaf.next_value.is_zero(), "tail must point back at zero");
        values
    }

    #[test]
    fn prefill_builds_a_linked_chain() {
        let tree = new_tree(4);
        assert_eq!(tree.num_leaves(true), 4);
        assert_eq!(walk(&tree), vec![v(1), v(2), v(3)]);

        let (index, present) = tree.get_previous_value_index(v(2), true).unwrap();
        assert_eq!((index, present), (2, true));
    }

    #[test]
    fn batch_insert_with_in_batch_predecessor() {
        // Insert [5, 7] into a tree holding only the sentinel: 5 claims the
        // sentinel as its low leaf, so 7's predecessor exists only inside
        // the batch and its witness must be empty.
        let mut tree = new_tree(1);
        let result = tree.batch_insert(&[v(5), v(7)], 1).unwrap();

        assert_eq!(result.sorted_leaves, vec![v(5), v(7)]);
        assert_eq!(result.sorted_indexes, vec![0, 1]);

        let witness_5 = &result.low_leaf_witnesses[0];
        assert_eq!(witness_5.index, 0);
        assert_eq!(witness_5.preimage, IndexedLeafPreimage::empty());
        assert_eq!(witness_5.sibling_path.len(), DEPTH);
        assert!(!witness_5.is_empty());

        assert!(result.low_leaf_witnesses[1].is_empty());

        assert_eq!(walk(&tree), vec![v(5), v(7)]);
        let tail = tree.get_leaf_preimage(2, true).unwrap();
        assert_eq!(tail, IndexedLeafPreimage { value: v(7), next_value: v(0), next_index: 0 });
    }

    #[test]
    fn batch_insert_matches_the_worked_example() {
        // Tree holding 0, 5, 10, 15; inserting [2, 3, 20, 19] exercises an
        // in-batch predecessor both below (3 after 2) and above (20 after
        // 19) existing chain anchors.
        let mut tree = new_tree(1);
        tree.batch_insert(&[v(5), v(10), v(15)], 2).unwrap();
        tree.commit().unwrap();

        let result = tree.batch_insert(&[v(2), v(3), v(20), v(19)], 2).unwrap();
        assert_eq!(result.sorted_leaves, vec![v(2), v(3), v(19), v(20)]);
        assert_eq!(result.sorted_indexes, vec![0, 1, 3, 2]);

        // 2 and 19 claim on-tree leaves; 3 and 20 splice into the batch.
        assert!(!result.low_leaf_witnesses[0].is_empty());
        assert!(result.low_leaf_witnesses[1].is_empty());
        assert!(!result.low_leaf_witnesses[2].is_empty());
        assert!(result.low_leaf_witnesses[3].is_empty());

        assert_eq!(
            walk(&tree),
            vec![v(2), v(3), v(5), v(10), v(15), v(19), v(20)]
        );

        // New leaves keep the input order of the batch.
        let start = 4;
        assert_eq!(tree.get_leaf_preimage(start, true).unwrap().value, v(2));
        assert_eq!(tree.get_leaf_preimage(start + 1, true).unwrap().value, v(3));
        assert_eq!(tree.get_leaf_preimage(start + 2, true).unwrap().value, v(20));
        assert_eq!(tree.get_leaf_preimage(start + 3, true).unwrap().value, v(19));
    }

    #[test]
    fn zero_values_get_empty_witnesses_and_slots() {
        let mut tree = new_tree(1);
        let result = tree.batch_insert(&[v(9), v(0), v(4), v(0)], 2).unwrap();

        assert_eq!(result.sorted_leaves, vec![v(0), v(0), v(4), v(9)]);
        assert!(result.low_leaf_witnesses[0].is_empty());
        assert!(result.low_leaf_witnesses[1].is_empty());

        assert_eq!(walk(&tree), vec![v(4), v(9)]);
        // Unoccupied slots stay empty in the arena.
        assert!(tree.get_leaf_preimage(2, true).unwrap().is_empty());
        assert!(tree.get_leaf_preimage(4, true).unwrap().is_empty());
    }

    #[test]
    fn batch_insert_equals_sequential_ascending_inserts() {
        let values = [v(12), v(47), v(23), v(8), v(90), v(31), v(2), v(66)];
        let mut ascending = values;
        ascending.sort();

        let mut batched = new_tree(1);
        batched.batch_insert(&ascending, 3).unwrap();

        let mut sequential = new_tree(1);
        for value in ascending {
            sequential.batch_insert(&[value], 0).unwrap();
        }

        assert_eq!(batched.get_root(true), sequential.get_root(true));
        assert_eq!(walk(&batched), walk(&sequential));
    }

    #[test]
    fn random_batches_stay_sorted_and_sound() {
        let mut rng = StdRng::seed_from_u64(0xfeed);
        let mut tree = new_tree(1);
        let mut inserted = Vec::new();

        for _ in 0..6 {
            let mut batch = Vec::new();
            while batch.len() < 4 {
                let candidate = v(rng.gen_range(1..10_000));
                if !inserted.contains(&candidate) && !batch.contains(&candidate) {
                    batch.push(candidate);
                }
            }
            inserted.extend(batch.iter().copied());
            tree.batch_insert(&batch, 2).unwrap();
        }

        let visited = walk(&tree);
        let mut expected = inserted.clone();
        expected.sort();
        assert_eq!(visited, expected);

        // Non-membership soundness for arbitrary absent values.
        for _ in 0..50 {
            let absent = v(rng.gen_range(1..20_000));
            if inserted.contains(&absent) {
                continue;
            }
            let (index, present) = tree.get_previous_value_index(absent, true).unwrap();
            assert!(!present);
            let low = tree.get_leaf_preimage(index, true).unwrap();
            assert!(low.value < absent);
            assert!(low.next_value > absent || low.next_value.is_zero());
        }
    }

    #[test]
    fn duplicate_and_present_values_are_rejected() {
        let mut tree = new_tree(1);
        tree.batch_insert(&[v(10)], 0).unwrap();

        assert_eq!(
            tree.batch_insert(&[v(30), v(30)], 1),
            Err(BatchInsertionError::DuplicateValue(v(30)))
        );
        assert_eq!(
            tree.batch_insert(&[v(10), v(40)], 1),
            Err(BatchInsertionError::AlreadyPresent(v(10)))
        );
    }

    #[test]
    fn rollback_undoes_pointer_mutations() {
        let mut tree = new_tree(1);
        tree.batch_insert(&[v(100)], 0).unwrap();
        tree.commit().unwrap();
        let committed_root = tree.get_root(false);

        tree.batch_insert(&[v(50), v(150)], 1).unwrap();
        assert_ne!(tree.get_root(true), committed_root);

        tree.rollback();
        assert_eq!(tree.get_root(true), committed_root);
        assert_eq!(walk(&tree), vec![v(100)]);
        // The predecessor index must forget the rolled-back values too.
        let (index, _) = tree.get_previous_value_index(v(60), true).unwrap();
        assert_eq!(tree.get_leaf_preimage(index, true).unwrap().value, v(0));
    }

    #[test]
    fn reload_rebuilds_arena_and_predecessor_index() {
        let store: Arc<MemoryTreeStore> = Arc::new(MemoryTreeStore::default());
        let root = {
            let mut tree =
                IndexedTree::<Keccak>::new(store.clone(), "reload", DEPTH, 2).unwrap();
            tree.batch_insert(&[v(17), v(3)], 1).unwrap();
            tree.commit().unwrap();
            tree.get_root(false)
        };

        let reloaded = IndexedTree::<Keccak>::load(store, "reload", DEPTH).unwrap();
        assert_eq!(reloaded.get_root(false), root);
        assert_eq!(walk(&reloaded), vec![v(1), v(3), v(17)]);

        let (index, present) = reloaded.get_previous_value_index(v(5), true).unwrap();
        assert!(!present);
        assert_eq!(reloaded.get_leaf_preimage(index, true).unwrap().value, v(3));
    }

    #[test]
    fn witnesses_verify_against_intermediate_roots() {
        // Each non-empty witness must recompute the root of the state it was
        // taken against: the tree after all earlier low-leaf updates.
        let mut tree = new_tree(1);
        let result = tree.batch_insert(&[v(40), v(20)], 1).unwrap();

        // 20 is processed first and sees the untouched tree.
        let first = &result.low_leaf_witnesses[0];
        let leaf_hash = encode_leaf::<Keccak>(&first.preimage, true);
        let mut current = leaf_hash;
        let mut index = first.index;
        for sibling in first.sibling_path.as_slice() {
            current = if index & 1 == 0 {
                Keccak::compress(&current, sibling)
            } else {
                Keccak::compress(sibling, &current)
            };
            index >>= 1;
        }
        // The prior state here is the freshly prefilled tree.
        let prior = new_tree(1);
        assert_eq!(current, prior.get_root(true));
    }
}
