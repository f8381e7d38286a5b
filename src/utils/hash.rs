//! 32-bit FNV-1a hashing for key placement.
//!
//! Both the server's shard selection and the client's host routing take
//! `fnv1a_32(key) % count` with their own counts, so a given key's placement
//! is a pure function of the key bytes on both sides.

const FNV_OFFSET_BASIS_32: u32 = 0x811c9dc5;
const FNV_PRIME_32: u32 = 0x01000193;

/// Computes the 32-bit FNV-1a hash of the given byte slice.
#[inline]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS_32;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME_32);
    }
    hash
}
