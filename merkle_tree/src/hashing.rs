//! Hashing seam for the tree types.
//!
//! Trees never call a hash function directly; they go through [`TreeHasher`]
//! so the node compression function can be swapped without touching any tree
//! logic (e.g. for a circuit-friendly hash in production deployments).

use ethereum_types::H256;

/// A two-to-one node compression function plus a variable-length leaf hash.
pub trait TreeHasher {
    /// Compresses two child hashes into their parent hash.
    fn compress(lhs: &H256, rhs: &H256) -> H256;

    /// Hashes an arbitrary-length leaf preimage into a leaf hash.
    fn hash(input: &[u8]) -> H256;
}

/// The default [`TreeHasher`], backed by keccak256.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Keccak;

impl TreeHasher for Keccak {
    fn compress(lhs: &H256, rhs: &H256) -> H256 {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(lhs.as_bytes());
        buf[32..].copy_from_slice(rhs.as_bytes());
        keccak_hash::keccak(buf)
    }

    fn hash(input: &[u8]) -> H256 {
        keccak_hash::keccak(input)
    }
}

/// Precomputes the hash of the empty subtree at every level of a tree of the
/// given depth.
///
/// The returned table is indexed by level, where level `0` is the root and
/// level `depth` is the leaf layer. An empty leaf hashes to all zeroes.
pub(crate) fn zero_hashes<H: TreeHasher>(depth: usize) -> Vec<H256> {
    let mut hashes = vec![H256::zero(); depth + 1];
    for level in (0..depth).rev() {
        hashes[level] = H::compress(&hashes[level + 1], &hashes[level + 1]);
    }
    hashes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_table_is_built_leaf_up() {
        let table = zero_hashes::<Keccak>(3);

        assert_eq!(table.len(), 4);
        assert_eq!(table[3], H256::zero());
        assert_eq!(table[2], Keccak::compress(&table[3], &table[3]));
        assert_eq!(table[0], Keccak::compress(&table[1], &table[1]));
    }

    #[test]
    fn leaf_hash_is_keccak256() {
        use hex_literal::hex;

        assert_eq!(
            Keccak::hash(b"").as_bytes(),
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
        assert_eq!(
            Keccak::hash(b"abc").as_bytes(),
            hex!("4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45")
        );
    }

    #[test]
    fn compress_is_order_sensitive() {
        let a = Keccak::hash(b"a");
        let b = Keccak::hash(b"b");

        assert_ne!(Keccak::compress(&a, &b), Keccak::compress(&b, &a));
    }
}
