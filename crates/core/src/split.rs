//! In-memory splitting of byte buffers into complete chunk trees.
//!
//! This is the non-streaming counterpart of the client's streaming chunker,
//! used for buffers that are already in memory (manifest-trie nodes) and as
//! the oracle the streaming implementation is tested against. The two agree
//! chunk-for-chunk and address-for-address on identical input.

use bytes::{BufMut, Bytes, BytesMut};

use crate::address::ChunkAddress;
use crate::chunk::Chunk;
use crate::{BRANCHES, CHUNK_PAYLOAD_SIZE};

/// A complete chunk tree for one byte buffer: every chunk at every level,
/// leaves first, and the root address.
#[derive(Debug, Clone)]
pub struct ChunkTree {
    root: ChunkAddress,
    chunks: Vec<Chunk>,
}

impl ChunkTree {
    /// The root address of the tree.
    pub fn root(&self) -> ChunkAddress {
        self.root
    }

    /// All chunks in the tree, leaves before intermediates.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Consume the tree, yielding its chunks.
    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

/// Split a byte buffer into its full chunk tree.
///
/// Leaves are cut at 4096 bytes; each level of addresses is folded into
/// intermediate chunks of up to 128 children until a single chunk remains,
/// whose address is the root. Leaves are always folded under at least one
/// intermediate chunk. The empty buffer yields exactly one leaf chunk with
/// span 0, which is itself the root.
pub fn split(data: &[u8]) -> ChunkTree {
    if data.is_empty() {
        let leaf = Chunk::new_empty_leaf();
        return ChunkTree {
            root: leaf.address(),
            chunks: vec![leaf],
        };
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut level: Vec<Chunk> = data
        .chunks(CHUNK_PAYLOAD_SIZE)
        .map(|slice| Chunk::new_leaf_unchecked(Bytes::copy_from_slice(slice)))
        .collect();
    chunks.extend(level.iter().cloned());

    loop {
        let parents = next_level(&level);
        chunks.extend(parents.iter().cloned());
        if parents.len() == 1 {
            return ChunkTree {
                root: parents[0].address(),
                chunks,
            };
        }
        level = parents;
    }
}

/// Fold one level of chunks into the next: groups of up to 128 addresses
/// become one intermediate chunk whose span is the sum of the group's spans.
fn next_level(level: &[Chunk]) -> Vec<Chunk> {
    level
        .chunks(BRANCHES)
        .map(|group| {
            let mut payload = BytesMut::with_capacity(CHUNK_PAYLOAD_SIZE);
            let mut span = 0u64;
            for child in group {
                payload.put_slice(child.address().as_bytes());
                span += child.span();
            }
            Chunk::new_intermediate_unchecked(span, payload.freeze())
        })
        .collect()
}
