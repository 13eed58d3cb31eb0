//! MurmurHash3 (x86, 32-bit) and the JSON canonicalization the Bloom Filter
//! hashes against.
//!
//! The Bloom Filter has to agree bit-for-bit with a filter built by any other
//! process that might share the same memcache key, so this hash is
//! hand-rolled rather than pulled from a crate: the exact finalization mix,
//! and the fact that the result is treated as a *signed* 32-bit integer
//! before it's reduced mod `m`, are both load-bearing.

use serde::Serialize;
use serde_json::Value;

const C1: u32 = 0xcc9e2d51;
const C2: u32 = 0x1b873593;

/// MurmurHash3 x86_32 over `data` with the given `seed`, returned as the
/// signed 32-bit value a Python `mmh3.hash(data, seed)` caller would see.
pub fn murmur3_32(data: &[u8], seed: u32) -> i32 {
    let mut h1 = seed;
    let nblocks = data.len() / 4;

    for chunk in data[..nblocks * 4].chunks_exact(4) {
        let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = &data[nblocks * 4..];
    let mut k1: u32 = 0;
    for (i, byte) in tail.iter().enumerate().rev() {
        k1 ^= (*byte as u32) << (8 * i);
    }
    if !tail.is_empty() {
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;

    h1 as i32
}

/// Render `value` as canonical JSON: object keys sorted, no extra
/// whitespace. Two calls for values that are equal as data always produce
/// identical bytes, which is what lets the Bloom Filter treat structurally
/// equal values (regardless of field order) as the same element.
pub fn canonicalize<T: Serialize>(value: &T) -> String {
    let as_value: Value = serde_json::to_value(value).expect("value is serializable to JSON");
    as_value.to_string()
}

/// Which of the `k` bit positions (each in `0..m`) a value maps to, using
/// one MurmurHash3 call per hash function seeded `0..k`.
///
/// Negative hashes are reduced with `rem_euclid`, matching Python's `%`
/// operator, so this lands on the same bit positions a Python peer sharing
/// this filter's memcache key would compute.
pub fn bit_positions<T: Serialize>(value: &T, k: u32, m: u32) -> Vec<u32> {
    let canonical = canonicalize(value);
    let bytes = canonical.as_bytes();
    (0..k)
        .map(|seed| murmur3_32(bytes, seed).rem_euclid(m as i32) as u32)
        .collect()
}
