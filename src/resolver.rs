//! Key-to-shard resolution.
//!
//! Uses the 32-bit Murmur3 (x86_32, seed 0) hash of the key's 8 little-endian
//! bytes. The hash is unkeyed and fully specified, so an index computed here
//! matches the one computed by any other Murmur3-based implementation, across
//! restarts and across languages.

use crate::error::{Error, Result};
use crate::shard::ShardKey;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

#[inline]
fn mix_k1(mut k1: u32) -> u32 {
  k1 = k1.wrapping_mul(C1);
  k1 = k1.rotate_left(15);
  k1.wrapping_mul(C2)
}

#[inline]
fn mix_h1(mut h1: u32, k1: u32) -> u32 {
  h1 ^= k1;
  h1 = h1.rotate_left(13);
  h1.wrapping_mul(5).wrapping_add(0xe654_6b64)
}

#[inline]
fn fmix(mut h1: u32, length: u32) -> u32 {
  h1 ^= length;
  h1 ^= h1 >> 16;
  h1 = h1.wrapping_mul(0x85eb_ca6b);
  h1 ^= h1 >> 13;
  h1 = h1.wrapping_mul(0xc2b2_ae35);
  h1 ^= h1 >> 16;
  h1
}

/// Murmur3 x86_32 hash of a 64-bit key, returned as a signed 32-bit value.
#[inline]
pub fn murmur3_32(key: ShardKey) -> i32 {
  let bits = key as u64;
  let low = bits as u32;
  let high = (bits >> 32) as u32;

  let mut h1 = mix_h1(0, mix_k1(low));
  h1 = mix_h1(h1, mix_k1(high));
  fmix(h1, 8) as i32
}

/// Hash-based placement strategy.
///
/// The hash breaks up structured keys (sequential ids, multiples of the
/// shard count) that a bare `key % count` would cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashStrategy;

impl HashStrategy {
  pub fn new() -> Self {
    Self
  }

  /// Maps a key to an index in `0..shard_count`.
  ///
  /// The index is `|hash % shard_count|` with truncating remainder.
  ///
  /// # Errors
  ///
  /// Returns `Error::Config` if `shard_count` is zero.
  #[inline]
  pub fn shard_index(&self, key: ShardKey, shard_count: usize) -> Result<usize> {
    if shard_count == 0 {
      return Err(Error::Config("Total shards must be positive".into()));
    }

    let hash = murmur3_32(key) as i64;
    // A count beyond i64::MAX is unrepresentable as a registry anyway.
    let count = i64::try_from(shard_count).unwrap_or(i64::MAX);
    Ok((hash % count).unsigned_abs() as usize)
  }
}
