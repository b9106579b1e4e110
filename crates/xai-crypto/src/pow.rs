use xai_core::types::Hash32;

/// Count leading zero bits of a 256-bit digest.
pub fn leading_zero_bits(hash: &Hash32) -> u32 {
    let mut count = 0u32;
    for byte in hash.as_bytes() {
        let lz = byte.leading_zeros();
        count += lz;
        if lz < 8 {
            break;
        }
    }
    count
}

/// True when `hash` has at least `difficulty` leading zero bits — the PoW
/// target in its leading-zero-bits encoding.
pub fn meets_difficulty(hash: &Hash32, difficulty: u32) -> bool {
    leading_zero_bits(hash) >= difficulty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_zeros_counted_bitwise() {
        let mut h = [0u8; 32];
        h[0] = 0b0000_1111;
        assert_eq!(leading_zero_bits(&Hash32::from_bytes(h)), 4);

        let mut h2 = [0u8; 32];
        h2[0] = 0b0000_0001;
        assert_eq!(leading_zero_bits(&Hash32::from_bytes(h2)), 7);

        let mut h3 = [0u8; 32];
        h3[1] = 0xFF;
        assert_eq!(leading_zero_bits(&Hash32::from_bytes(h3)), 8);
    }

    #[test]
    fn all_zero_hash_meets_anything_expressible() {
        let zero = Hash32::ZERO;
        assert_eq!(leading_zero_bits(&zero), 256);
        assert!(meets_difficulty(&zero, 255));
    }

    #[test]
    fn difficulty_zero_always_met() {
        assert!(meets_difficulty(&Hash32::from_bytes([0xFF; 32]), 0));
    }
}
