pub mod mocks;

use apiary_core::Chunk;
use bytes::Bytes;

/// Deterministic pseudo-random bytes for repeatable chunk trees.
#[allow(dead_code)]
pub fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state & 0xFF) as u8
        })
        .collect()
}

/// A distinct leaf chunk per tag.
#[allow(dead_code)]
pub fn leaf(tag: u32) -> Chunk {
    Chunk::leaf(Bytes::from(tag.to_be_bytes().to_vec())).unwrap()
}
