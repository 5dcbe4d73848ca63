// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Term-key hashing.
//!
//! Every token and URL in the system is identified by a 64-bit xxh3 hash.
//! The hash must be stable across runs and platforms because it is baked
//! into shard files: shard routing is `key % n_shards` and the directory
//! slot is `key % hash_table_size`.

use xxhash_rust::xxh3::xxh3_64;

/// Hash a normalized token or URL string to its 64-bit term key.
#[inline]
pub fn term_key(s: &str) -> u64 {
    xxh3_64(s.as_bytes())
}

/// Hash a raw 64-bit value (used to feed HyperLogLog counters, which need
/// well-mixed input rather than e.g. consecutive vertex ids).
#[inline]
pub fn mix_u64(v: u64) -> u64 {
    xxh3_64(&v.to_le_bytes())
}
