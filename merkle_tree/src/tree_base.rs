//! Shared machinery for every fixed-height tree kind.
//!
//! A [`TreeBase`] keeps the committed tree in the store and buffers all
//! uncommitted node writes in an in-memory overlay. Writing a leaf rehashes
//! the path up to the root incrementally, so the uncommitted root is always
//! current. `commit` flushes the overlay to the store as one batch;
//! `rollback` simply drops it.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use ethereum_types::H256;
use log::trace;
use thiserror::Error;

use crate::hashing::{zero_hashes, TreeHasher};
use crate::store::{decode_hash, meta_key, node_key, StorageError, TreeStore, WriteBatch};
use crate::types::{SiblingPath, TreeSnapshot};

/// Deepest supported tree; keeps leaf indices and capacities within `u64`.
pub const MAX_TREE_DEPTH: usize = 63;

/// Stores the result of tree operations. Returns a [`TreeError`] upon
/// failure.
pub type TreeResult<T> = Result<T, TreeError>;

/// An error raised by the base tree machinery.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TreeError {
    /// The operation would grow the tree past `2^depth` leaves.
    #[error("tree `{name}` is full: cannot grow to {requested} leaves (capacity {capacity})")]
    CapacityExceeded {
        /// Name of the offending tree.
        name: String,
        /// Leaf count the operation asked for.
        requested: u64,
        /// Maximum leaf count of the tree.
        capacity: u64,
    },

    /// A leaf index outside the tree was addressed.
    #[error("leaf index {index} is out of bounds for tree `{name}` (capacity {capacity})")]
    LeafIndexOutOfBounds {
        /// Name of the offending tree.
        name: String,
        /// The out-of-bounds index.
        index: u64,
        /// Maximum leaf count of the tree.
        capacity: u64,
    },

    /// The requested tree depth cannot be represented.
    #[error("unsupported depth {depth} for tree `{name}` (must be 1..={MAX_TREE_DEPTH})")]
    UnsupportedDepth {
        /// Name of the offending tree.
        name: String,
        /// The rejected depth.
        depth: usize,
    },

    /// The backing store failed or returned corrupt data.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Committed `(root, size)` of a tree, as persisted in the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct TreeMeta {
    pub(crate) root: H256,
    pub(crate) size: u64,
}

impl TreeMeta {
    fn encode(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(40);
        buf.extend_from_slice(self.root.as_bytes());
        buf.extend_from_slice(&self.size.to_be_bytes());
        buf
    }

    fn decode(key: &[u8], bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() != 40 {
            return Err(StorageError::Corrupt {
                key: key.to_vec(),
                expected: 40,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            root: H256::from_slice(&bytes[..32]),
            size: u64::from_be_bytes(bytes[32..40].try_into().expect("length checked")),
        })
    }
}

/// Node cache, hashing, and commit/rollback plumbing shared by all tree
/// kinds. Levels run from `0` (root) to `depth` (leaves).
pub(crate) struct TreeBase<H: TreeHasher> {
    store: Arc<dyn TreeStore>,
    name: String,
    depth: usize,
    zero_hashes: Vec<H256>,
    /// Last committed state; reads with `include_uncommitted = false` and
    /// rollback resolve against this.
    committed: TreeMeta,
    /// Uncommitted node overlay keyed by `(level, index)`.
    cache: HashMap<(usize, u64), H256>,
    /// Uncommitted leaf count.
    size: u64,
    /// Uncommitted root.
    root: H256,
    _hasher: PhantomData<H>,
}

impl<H: TreeHasher> TreeBase<H> {
    /// Creates a fresh, empty tree. Nothing is persisted until the first
    /// commit.
    pub(crate) fn new(store: Arc<dyn TreeStore>, name: &str, depth: usize) -> TreeResult<Self> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(TreeError::UnsupportedDepth {
                name: name.to_owned(),
                depth,
            });
        }
        let zero_hashes = zero_hashes::<H>(depth);
        let empty_root = zero_hashes[0];
        Ok(Self {
            store,
            name: name.to_owned(),
            depth,
            zero_hashes,
            committed: TreeMeta {
                root: empty_root,
                size: 0,
            },
            cache: HashMap::new(),
            size: 0,
            root: empty_root,
            _hasher: PhantomData,
        })
    }

    /// Restores a tree from its committed store state. Returns a fresh tree
    /// if no meta entry exists yet.
    pub(crate) fn load(store: Arc<dyn TreeStore>, name: &str, depth: usize) -> TreeResult<Self> {
        let mut tree = Self::new(store, name, depth)?;
        let key = meta_key(name);
        if let Some(bytes) = tree.store.get(&key)? {
            let meta = TreeMeta::decode(&key, &bytes)?;
            tree.committed = meta;
            tree.size = meta.size;
            tree.root = meta.root;
        }
        Ok(tree)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub(crate) fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    pub(crate) fn root(&self, include_uncommitted: bool) -> H256 {
        if include_uncommitted {
            self.root
        } else {
            self.committed.root
        }
    }

    pub(crate) fn size(&self, include_uncommitted: bool) -> u64 {
        if include_uncommitted {
            self.size
        } else {
            self.committed.size
        }
    }

    pub(crate) fn snapshot(&self, include_uncommitted: bool) -> TreeSnapshot {
        TreeSnapshot {
            root: self.root(include_uncommitted),
            next_available_leaf_index: self.size(include_uncommitted),
        }
    }

    /// Grows the uncommitted leaf count; callers check capacity first.
    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Hash of the node at `(level, index)`, falling back to the committed
    /// store and then to the empty-subtree hash for that level.
    pub(crate) fn node_hash(
        &self,
        level: usize,
        index: u64,
        include_uncommitted: bool,
    ) -> TreeResult<H256> {
        if include_uncommitted {
            if let Some(hash) = self.cache.get(&(level, index)) {
                return Ok(*hash);
            }
        }
        let key = node_key(&self.name, level, index);
        match self.store.get(&key)? {
            Some(bytes) => Ok(decode_hash(&key, &bytes)?),
            None => Ok(self.zero_hashes[level]),
        }
    }

    /// Writes a leaf hash and rehashes its path to the root in the
    /// uncommitted overlay.
    pub(crate) fn set_leaf(&mut self, index: u64, leaf: H256) -> TreeResult<()> {
        if index >= self.capacity() {
            return Err(TreeError::LeafIndexOutOfBounds {
                name: self.name.clone(),
                index,
                capacity: self.capacity(),
            });
        }
        trace!("tree `{}`: writing leaf {index}", self.name);

        self.cache.insert((self.depth, index), leaf);
        let mut current = leaf;
        let mut idx = index;
        for level in (1..=self.depth).rev() {
            let sibling = self.node_hash(level, idx ^ 1, true)?;
            current = if idx & 1 == 0 {
                H::compress(&current, &sibling)
            } else {
                H::compress(&sibling, &current)
            };
            idx >>= 1;
            self.cache.insert((level - 1, idx), current);
        }
        self.root = current;
        Ok(())
    }

    /// Sibling path of the leaf at `index`, leaf-level sibling first; length
    /// equals the tree depth.
    pub(crate) fn sibling_path(
        &self,
        index: u64,
        include_uncommitted: bool,
    ) -> TreeResult<SiblingPath> {
        if index >= self.capacity() {
            return Err(TreeError::LeafIndexOutOfBounds {
                name: self.name.clone(),
                index,
                capacity: self.capacity(),
            });
        }
        let mut path = Vec::with_capacity(self.depth);
        let mut idx = index;
        for level in (1..=self.depth).rev() {
            path.push(self.node_hash(level, idx ^ 1, include_uncommitted)?);
            idx >>= 1;
        }
        Ok(SiblingPath::new(path))
    }

    /// Flushes the uncommitted overlay and the new `(root, size)` meta to the
    /// store as one batch, then promotes the uncommitted state to committed.
    pub(crate) fn commit(&mut self) -> TreeResult<()> {
        let meta = TreeMeta {
            root: self.root,
            size: self.size,
        };
        let mut batch = WriteBatch::default();
        for (&(level, index), hash) in &self.cache {
            batch.put(node_key(&self.name, level, index), hash.as_bytes().to_vec());
        }
        batch.put(meta_key(&self.name), meta.encode());
        self.store.write_batch(batch)?;
        self.committed = meta;
        self.cache.clear();
        Ok(())
    }

    /// Drops the uncommitted overlay, restoring the last committed state.
    pub(crate) fn rollback(&mut self) {
        self.cache.clear();
        self.size = self.committed.size;
        self.root = self.committed.root;
    }
}

impl<H: TreeHasher> std::fmt::Debug for TreeBase<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeBase")
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("committed", &self.committed)
            .field("size", &self.size)
            .field("root", &self.root)
            .field("dirty_nodes", &self.cache.len())
            .finish()
    }
}
