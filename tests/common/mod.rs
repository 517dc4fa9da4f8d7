#![allow(dead_code)]

use std::sync::Arc;

use rxcore::Cache;

pub const KEY_000: &[u8] = b"test key 000";
pub const KEY_001: &[u8] = b"test key 001";

pub const INPUT_TEST: &[u8] = b"This is a test";
pub const INPUT_LOREM: &[u8] = b"Lorem ipsum dolor sit amet";
pub const INPUT_SED: &[u8] = b"sed do eiusmod tempor incididunt ut labore et dolore magna aliqua";

lazy_static! {
    pub static ref CACHE_000: Arc<Cache> = rxcore::build_cache(KEY_000).unwrap();
}

pub fn hex(digest: &[u8]) -> String {
    rxcore::byte_string::u8_array_to_string(digest)
}

pub fn bit_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}
