//! Protocol-level tree shapes and per-transaction limits.

/// Height of the note hash (commitment) tree.
pub const NOTE_HASH_TREE_HEIGHT: usize = 32;
/// Height of the nullifier tree.
pub const NULLIFIER_TREE_HEIGHT: usize = 20;
/// Height of the public data tree; leaf index is the storage slot.
pub const PUBLIC_DATA_TREE_HEIGHT: usize = 40;
/// Height of the L1-to-L2 message tree.
pub const L1_TO_L2_MSG_TREE_HEIGHT: usize = 16;
/// Height of the archive tree of historical block hashes.
pub const ARCHIVE_TREE_HEIGHT: usize = 16;

/// Commitments a single transaction may create.
pub const MAX_NEW_COMMITMENTS_PER_TX: usize = 4;
/// Nullifiers a single transaction may emit.
pub const MAX_NEW_NULLIFIERS_PER_TX: usize = 4;
/// Public storage writes a single transaction may perform.
pub const MAX_PUBLIC_DATA_WRITES_PER_TX: usize = 4;

/// Height of the note hash subtree appended per base rollup, covering the
/// commitments of one transaction pair.
pub const NOTE_HASH_SUBTREE_HEIGHT: usize = 3;
/// Height of the nullifier subtree appended per base rollup.
pub const NULLIFIER_SUBTREE_HEIGHT: usize = 3;

/// L1-to-L2 messages consumed by every block, zero-padded if fewer arrive.
pub const NUM_L1_TO_L2_MSGS_PER_BLOCK: usize = 16;
/// Height of the message subtree appended per block.
pub const L1_TO_L2_MSG_SUBTREE_HEIGHT: usize = 4;

/// Nullifier tree leaves present at genesis. One subtree's worth of linked
/// dummy leaves, so the first real batch starts on a subtree boundary.
pub const INITIAL_NULLIFIER_TREE_SIZE: u64 = 1 << NULLIFIER_SUBTREE_HEIGHT;
