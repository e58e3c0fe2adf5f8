//! A stable byte-string hash producing a `MAXBITS`-wide word, used as the
//! per-attribute hash that the choice vector draws bits from.
//!
//! This is the classic Bob Jenkins "one-at-a-time" hash. It is not
//! cryptographic; it only needs reasonable bit diffusion and, critically,
//! it must be stable across process runs so that an index written in one
//! session addresses the same buckets when reopened in the next.

use crate::bits::Bits;

pub fn hash(bytes: &[u8]) -> Bits {
    let mut h: u32 = 0;
    for &b in bytes {
        h = h.wrapping_add(b as u32);
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h = h.wrapping_add(h << 15);
    h
}
