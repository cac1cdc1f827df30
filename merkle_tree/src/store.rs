//! Durable storage boundary for the trees.
//!
//! A [`TreeStore`] is an ordered key/value store holding, per tree, every
//! committed node hash keyed by `(tree name, level, index)` plus the committed
//! `(root, size)` meta entry, so a node can restart without replaying blocks.
//! Uncommitted state never reaches the store; trees buffer it in memory and
//! flush it as a single [`WriteBatch`] on commit.

use std::collections::BTreeMap;

use ethereum_types::H256;
use parking_lot::RwLock;
use thiserror::Error;

/// Stores the result of store operations. Returns a [`StorageError`] upon
/// failure.
pub type StoreResult<T> = Result<T, StorageError>;

/// An error raised by a [`TreeStore`] implementation or by decoding what it
/// returned.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StorageError {
    /// The backing store itself failed (I/O, corruption, ...).
    #[error("tree store backend failure: {0}")]
    Backend(String),

    /// An entry was present but did not decode to the expected shape.
    #[error("corrupt tree store entry under key 0x{}: expected {expected} bytes, got {actual}", hex::encode(key))]
    Corrupt {
        /// The key of the offending entry.
        key: Vec<u8>,
        /// Number of bytes the decoder expected.
        expected: usize,
        /// Number of bytes actually stored.
        actual: usize,
    },
}

/// A set of writes applied to a [`TreeStore`] as one unit.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    /// Queues a single key/value write.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push((key, value));
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether no writes have been queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consumes the batch, yielding the queued writes in insertion order.
    pub fn into_ops(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.ops
    }
}

/// Durable ordered key/value storage used to persist committed tree state.
///
/// Implementations take `&self` for every operation so one store can be
/// shared across all trees of a database instance.
pub trait TreeStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Writes a single key/value pair.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StoreResult<()>;

    /// Applies every write in `batch` as one atomic unit.
    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// An in-memory [`TreeStore`] over an ordered map.
///
/// The primary store in tests; also usable as an ephemeral node backend.
#[derive(Debug, Default)]
pub struct MemoryTreeStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl TreeStore for MemoryTreeStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StoreResult<()> {
        self.map.write().insert(key, value);
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut map = self.map.write();
        for (key, value) in batch.into_ops() {
            map.insert(key, value);
        }
        Ok(())
    }
}

/// Key of the node hash at `(level, index)` of the named tree.
pub(crate) fn node_key(name: &str, level: usize, index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 12);
    key.extend_from_slice(name.as_bytes());
    key.extend_from_slice(b":n:");
    key.push(level as u8);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Key of the committed `(root, size)` meta entry of the named tree.
pub(crate) fn meta_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 5);
    key.extend_from_slice(name.as_bytes());
    key.extend_from_slice(b":meta");
    key
}

/// Key of the indexed-tree leaf preimage at `index` of the named tree.
pub(crate) fn leaf_key(name: &str, index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 11);
    key.extend_from_slice(name.as_bytes());
    key.extend_from_slice(b":l:");
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub(crate) fn decode_hash(key: &[u8], bytes: &[u8]) -> StoreResult<H256> {
    if bytes.len() != 32 {
        return Err(StorageError::Corrupt {
            key: key.to_vec(),
            expected: 32,
            actual: bytes.len(),
        });
    }
    Ok(H256::from_slice(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_writes_land_together() {
        let store = MemoryTreeStore::default();
        let mut batch = WriteBatch::default();
        batch.put(b"a".to_vec(), vec![1]);
        batch.put(b"b".to_vec(), vec![2]);

        assert_eq!(batch.len(), 2);
        store.write_batch(batch).unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(vec![1]));
        assert_eq!(store.get(b"b").unwrap(), Some(vec![2]));
        assert_eq!(store.get(b"c").unwrap(), None);
    }

    #[test]
    fn node_keys_do_not_collide_across_trees_or_levels() {
        assert_ne!(node_key("x", 1, 0), node_key("x", 0, 256));
        assert_ne!(node_key("x", 1, 0), node_key("y", 1, 0));
        assert_ne!(node_key("x", 1, 0), leaf_key("x", 0));
        assert_ne!(meta_key("x"), meta_key("y"));
    }
}
