//! Stateless deterministic hashing; every random choice derives from `(seed, tick, salt)`.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// SplitMix64 finalizer.
pub fn mix64(mut value: u64) -> u64 {
    value = value.wrapping_add(0x9e37_79b9_7f4a_7c15);
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    value ^ (value >> 31)
}

pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

pub fn hash2(seed: i64, a: i64, b: i64) -> u64 {
    let mut h = mix64(seed as u64);
    h = mix64(h ^ a as u64);
    mix64(h ^ (b as u64).rotate_left(17))
}

pub fn hash3(seed: i64, a: i64, b: i64, c: i64) -> u64 {
    mix64(hash2(seed, a, b) ^ (c as u64).rotate_left(31))
}

/// Draw for `(seed, tick, salt)`.
pub fn roll(seed: i64, tick: u64, salt: u64) -> u64 {
    hash3(seed, tick as i64, salt as i64, 0x5eed)
}

/// True with probability `permille / 1000`.
pub fn chance_permille(value: u64, permille: u32) -> bool {
    value % 1000 < u64::from(permille)
}

/// Picks an index proportional to `weights`; `None` when all weights are zero.
pub fn weighted_index(value: u64, weights: &[u64]) -> Option<usize> {
    let total: u64 = weights.iter().sum();
    if total == 0 {
        return None;
    }
    let mut pick = value % total;
    for (index, weight) in weights.iter().enumerate() {
        if pick < *weight {
            return Some(index);
        }
        pick -= *weight;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_stable_and_salt_sensitive() {
        assert_eq!(hash3(42, 1, 2, 3), hash3(42, 1, 2, 3));
        assert_ne!(hash3(42, 1, 2, 3), hash3(42, 1, 2, 4));
        assert_ne!(roll(42, 3000, 1337), roll(43, 3000, 1337));
        assert_eq!(fnv1a(b""), FNV_OFFSET);
    }

    #[test]
    fn weighted_index_respects_zero_weights() {
        assert_eq!(weighted_index(5, &[0, 0]), None);
        for value in 0..50 {
            assert_eq!(weighted_index(value, &[0, 3, 0]), Some(1));
        }
        assert_eq!(weighted_index(0, &[1, 1]), Some(0));
        assert_eq!(weighted_index(1, &[1, 1]), Some(1));
    }
}
