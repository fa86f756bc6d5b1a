//! Case-insensitive key hashing and comparison for the header store.

const SEED: u32 = 0;
const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

fn scramble(mut k: u32) -> u32 {
    k = k.wrapping_mul(C1);
    k = k.rotate_left(15);
    k.wrapping_mul(C2)
}

/// 32-bit MurmurHash3 of `key`, with every byte ASCII lower-cased before mixing.
///
/// Keys that differ only in ASCII case hash to the same value.
pub fn hash_folded(key: &[u8]) -> u32 {
    let mut h = SEED;

    let mut blocks = key.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([
            block[0].to_ascii_lowercase(),
            block[1].to_ascii_lowercase(),
            block[2].to_ascii_lowercase(),
            block[3].to_ascii_lowercase(),
        ]);

        h ^= scramble(k);
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let mut k = 0u32;
    for byte in blocks.remainder().iter().rev() {
        k <<= 8;
        k |= byte.to_ascii_lowercase() as u32;
    }
    h ^= scramble(k);

    // Length is mixed in modulo 2^32, matching the reference algorithm
    h ^= key.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;

    h
}

pub fn eq_folded(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
