//! Persistent Merkle trees with a committed/uncommitted two-phase state
//! model.
//!
//! Three tree flavors share one storage and hashing substrate:
//!
//! - [`AppendOnlyTree`]: leaves are only ever added at the next free index.
//! - [`SparseTree`]: any leaf slot can be written and rewritten in place.
//! - [`IndexedTree`]: append-only, but the leaf preimages form a sorted
//!   linked list so the tree can prove values absent and insert whole
//!   batches with per-value non-membership witnesses.
//!
//! Every mutation lands in an in-memory workspace first; reads choose
//! between the workspace and the last committed state via an
//! `include_uncommitted` flag. [`AppendOnlyTree::commit`] (and its
//! siblings) persist the workspace atomically, `rollback` discards it.

pub mod append_only;
pub mod hashing;
pub mod indexed;
pub mod sparse;
pub mod store;
pub mod tree_base;
pub mod types;

pub use append_only::AppendOnlyTree;
pub use hashing::{Keccak, TreeHasher};
pub use indexed::{BatchInsertionError, IndexedTree};
pub use sparse::SparseTree;
pub use store::{MemoryTreeStore, StorageError, StoreResult, TreeStore, WriteBatch};
pub use tree_base::{TreeError, TreeResult, MAX_TREE_DEPTH};
pub use types::{
    BatchInsertionResult, IndexedLeafPreimage, LowLeafWitness, MembershipWitness, SiblingPath,
    TreeSnapshot,
};
