//! Payload integrity: MetroHash64 with seed 0, interpreted as a little-endian u64.

use metrohash::MetroHash64;
use std::hash::Hasher;

pub fn crc64(data: &[u8]) -> u64 {
    let mut hasher = MetroHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}
