//! Value types shared by the tree implementations and their callers.

use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};

/// The ordered set of sibling hashes needed to recompute a Merkle root from
/// one leaf, lowest (leaf-level) sibling first.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SiblingPath(Vec<H256>);

impl SiblingPath {
    /// Wraps an ordered list of sibling hashes.
    pub fn new(hashes: Vec<H256>) -> Self {
        Self(hashes)
    }

    /// An all-zero path of the given length, used as the placeholder witness
    /// for values that carry no on-tree proof material.
    pub fn zero(len: usize) -> Self {
        Self(vec![H256::zero(); len])
    }

    /// Path length; equal to the tree height for a full path.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path holds no hashes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The sibling hashes, leaf level first.
    pub fn as_slice(&self) -> &[H256] {
        &self.0
    }

    /// Drops the lowest `subtree_height` entries, leaving the path from a
    /// whole subtree's root up to the tree root. Used for subtree appends.
    pub fn subtree_path(&self, subtree_height: usize) -> SiblingPath {
        Self(self.0[subtree_height.min(self.0.len())..].to_vec())
    }
}

/// A `(root, size)` pair identifying a tree's state at a point in time.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TreeSnapshot {
    /// Root hash of the tree.
    pub root: H256,
    /// Index the next appended leaf would occupy.
    pub next_available_leaf_index: u64,
}

/// Proof that a specific leaf sits at a specific index.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MembershipWitness {
    /// Index of the proven leaf.
    pub leaf_index: u64,
    /// Sibling path from that leaf to the root.
    pub sibling_path: SiblingPath,
}

/// One node of the sorted linked list an indexed tree stores in its leaves.
///
/// `next_value`/`next_index` point at the leaf holding the smallest value
/// greater than `value`; the list tail points back at `(0, 0)`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct IndexedLeafPreimage {
    /// The value stored in this leaf.
    pub value: U256,
    /// Value of the next-larger leaf, or zero at the list tail.
    pub next_value: U256,
    /// Index of the next-larger leaf, or zero at the list tail.
    pub next_index: u64,
}

impl IndexedLeafPreimage {
    /// The all-zero preimage, used both for the index-0 sentinel and for
    /// unoccupied slots in a batch insertion.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether every field is zero.
    pub fn is_empty(&self) -> bool {
        self.value.is_zero() && self.next_value.is_zero() && self.next_index == 0
    }

    /// Fixed-width hash input: `value || next_value || next_index`, all
    /// big-endian 32-byte words.
    pub fn to_hash_input(self) -> [u8; 96] {
        let mut buf = [0u8; 96];
        self.value.to_big_endian(&mut buf[..32]);
        self.next_value.to_big_endian(&mut buf[32..64]);
        buf[88..96].copy_from_slice(&self.next_index.to_be_bytes());
        buf
    }

    /// Compact store encoding: `value || next_value || next_index`.
    pub(crate) fn encode(self) -> [u8; 72] {
        let mut buf = [0u8; 72];
        self.value.to_big_endian(&mut buf[..32]);
        self.next_value.to_big_endian(&mut buf[32..64]);
        buf[64..72].copy_from_slice(&self.next_index.to_be_bytes());
        buf
    }

    pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 72 {
            return None;
        }
        Some(Self {
            value: U256::from_big_endian(&bytes[..32]),
            next_value: U256::from_big_endian(&bytes[32..64]),
            next_index: u64::from_be_bytes(bytes[64..72].try_into().ok()?),
        })
    }
}

/// Non-membership proof: the predecessor ("low") leaf of a value, with its
/// index and inclusion path.
///
/// An all-zero witness signals that the predecessor is not on the tree yet
/// and must be derived from batch-local data instead.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LowLeafWitness {
    /// Preimage of the predecessor leaf.
    pub preimage: IndexedLeafPreimage,
    /// Index of the predecessor leaf.
    pub index: u64,
    /// Inclusion path of the predecessor leaf.
    pub sibling_path: SiblingPath,
}

impl LowLeafWitness {
    /// The empty witness for a tree of the given height.
    pub fn empty(tree_height: usize) -> Self {
        Self {
            preimage: IndexedLeafPreimage::empty(),
            index: 0,
            sibling_path: SiblingPath::zero(tree_height),
        }
    }

    /// Whether this is the empty "derive from batch-local data" witness.
    ///
    /// A real witness against the zero sentinel also has an all-zero
    /// preimage at index 0, but carries the tree's actual sibling hashes.
    pub fn is_empty(&self) -> bool {
        self.preimage.is_empty()
            && self.index == 0
            && self.sibling_path.as_slice().iter().all(|h| h.is_zero())
    }
}

/// Everything a batch insertion returns to its caller.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BatchInsertionResult {
    /// One witness per inserted value, in ascending value order. Empty
    /// witnesses mark values whose predecessor is inside the same batch
    /// (and zero-valued inputs).
    pub low_leaf_witnesses: Vec<LowLeafWitness>,
    /// Path from the new subtree's slot to the root, taken before the
    /// subtree was appended.
    pub subtree_sibling_path: SiblingPath,
    /// The input values in ascending order.
    pub sorted_leaves: Vec<U256>,
    /// `sorted_leaves[i]` came from `values[sorted_indexes[i]]`; lets a
    /// verifier re-derive the original ordering.
    pub sorted_indexes: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preimage_store_encoding_round_trips() {
        let preimage = IndexedLeafPreimage {
            value: U256::from(17u64),
            next_value: U256::from(92u64),
            next_index: 5,
        };

        assert_eq!(IndexedLeafPreimage::decode(&preimage.encode()), Some(preimage));
        assert_eq!(IndexedLeafPreimage::decode(&[0u8; 40]), None);
    }

    #[test]
    fn subtree_path_drops_lowest_entries() {
        let path = SiblingPath::new((0..6).map(H256::from_low_u64_be).collect());
        let subtree = path.subtree_path(2);

        assert_eq!(subtree.len(), 4);
        assert_eq!(subtree.as_slice()[0], H256::from_low_u64_be(2));
    }
}
