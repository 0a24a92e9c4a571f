//! MurmurHash3 (32-bit), the canonical hash for flow dispatch.
//!
//! Non-cryptographic but well distributed and fast; the consistent-hash
//! ring positions and the flow hash are both derived from it. Results
//! are pinned across runs and platforms: blocks are read little-endian
//! per the reference algorithm, and tuples are hashed over their packed
//! network-order representation.

use crate::types::FiveTuple;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// MurmurHash3 x86 32-bit over `data` with the given seed.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h1 = seed;

    let mut chunks = data.chunks_exact(4);
    for block in &mut chunks {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, &b) in tail.iter().enumerate() {
            k1 ^= u32::from(b) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    fmix32(h1)
}

/// Final avalanche mix.
#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Hash a string key (ring virtual-node positions) with seed 0.
#[inline]
pub fn hash_key(key: &str) -> u32 {
    murmur3_32(key.as_bytes(), 0)
}

/// Hash a flow identity with seed 0.
#[inline]
pub fn hash_tuple(tuple: &FiveTuple) -> u32 {
    murmur3_32(&tuple.to_wire_bytes(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vectors for MurmurHash3 x86_32.
    #[test]
    fn reference_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514E_28B7);
        assert_eq!(murmur3_32(b"test", 0), 0xBA6B_D213);
    }

    #[test]
    fn deterministic_and_distinct() {
        let h1 = murmur3_32(b"hello", 0);
        let h2 = murmur3_32(b"world", 0);
        assert_ne!(h1, h2);
        assert_eq!(h1, murmur3_32(b"hello", 0));
    }

    #[test]
    fn equal_tuples_hash_equal() {
        let t1 = FiveTuple::new(0x0102_0304, 0x0506_0708, 80, 8080, 6);
        let t2 = FiveTuple::new(0x0102_0304, 0x0506_0708, 80, 8080, 6);
        let t3 = FiveTuple::new(0x0102_0305, 0x0506_0708, 80, 8080, 6);
        assert_eq!(hash_tuple(&t1), hash_tuple(&t2));
        assert_ne!(hash_tuple(&t1), hash_tuple(&t3));
    }
}
