use sha2::{Digest, Sha256};

use xai_core::types::Hash32;

/// Merkle root over transaction ids: pairwise SHA-256 of concatenated child
/// hashes, duplicating the last leaf at odd levels. Empty set → 32 zero bytes.
pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return Hash32::ZERO;
    }
    let mut level: Vec<Hash32> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("level is non-empty"));
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash32::from_bytes(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(b: u8) -> Hash32 {
        Hash32::from_bytes([b; 32])
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(merkle_root(&[]), Hash32::ZERO);
    }

    #[test]
    fn single_leaf_is_itself() {
        assert_eq!(merkle_root(&[leaf(1)]), leaf(1));
    }

    #[test]
    fn odd_count_duplicates_last() {
        // [a, b, c] hashes like [a, b, c, c].
        let three = merkle_root(&[leaf(1), leaf(2), leaf(3)]);
        let four = merkle_root(&[leaf(1), leaf(2), leaf(3), leaf(3)]);
        assert_eq!(three, four);
    }

    #[test]
    fn order_matters() {
        assert_ne!(
            merkle_root(&[leaf(1), leaf(2)]),
            merkle_root(&[leaf(2), leaf(1)])
        );
    }
}
