//! The rollup node's world state: five authenticated Merkle trees (note
//! hashes, nullifiers, public data, L1-to-L2 messages, and the archive of
//! block hashes) behind one serialized async interface with cross-tree
//! commit and rollback.

pub mod constants;
pub mod db;

pub use db::{
    compute_block_hash, MerkleTreeDb, TreeId, TreeInfo, TreeRoots, WorldStateError,
    WorldStateResult,
};
