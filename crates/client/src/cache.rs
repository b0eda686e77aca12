//! Local chunk cache.
//!
//! Uploaded chunks are optionally written under a data directory, one file
//! per chunk named by its hex address. The verifier later reads these files
//! back as the local reference copies.

use std::path::{Path, PathBuf};

use apiary_core::{CacheFormat, Chunk, ChunkAddress, SPAN_SIZE};
use bytes::Bytes;

use crate::error::Result;

/// A chunk read back from the cache: the payload, plus the span when the
/// cache format recorded one.
#[derive(Clone, Debug)]
pub struct CachedChunk {
    pub span: Option<u64>,
    pub payload: Bytes,
}

/// Filesystem chunk cache rooted at a data directory.
#[derive(Clone, Debug)]
pub struct ChunkCache {
    dir: PathBuf,
    format: CacheFormat,
}

impl ChunkCache {
    pub fn new(dir: impl Into<PathBuf>, format: CacheFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn chunk_path(&self, address: ChunkAddress) -> PathBuf {
        self.dir.join(address.to_hex())
    }

    /// Write one chunk, creating the data directory if needed.
    pub async fn write(&self, chunk: &Chunk) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = match self.format {
            CacheFormat::Payload => chunk.payload().clone(),
            CacheFormat::SpanPayload => chunk.to_wire(),
        };
        tokio::fs::write(self.chunk_path(chunk.address()), bytes).await?;
        Ok(())
    }

    /// Read one chunk back.
    pub async fn read(&self, address: ChunkAddress) -> Result<CachedChunk> {
        let bytes = tokio::fs::read(self.chunk_path(address)).await?;
        Ok(match self.format {
            CacheFormat::Payload => CachedChunk {
                span: None,
                payload: Bytes::from(bytes),
            },
            CacheFormat::SpanPayload => {
                let chunk = Chunk::from_wire(&bytes)?;
                CachedChunk {
                    span: Some(chunk.span()),
                    payload: chunk.payload().clone(),
                }
            }
        })
    }

    /// List every cached chunk address, sorted. Files whose names are not
    /// valid hex addresses are skipped.
    pub async fn list(&self) -> Result<Vec<ChunkAddress>> {
        let mut addresses = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Ok(address) = ChunkAddress::from_hex(name) {
                addresses.push(address);
            }
        }
        addresses.sort();
        Ok(addresses)
    }
}

/// Strip the wire span prefix, if present, from remote chunk bytes.
pub(crate) fn split_wire(wire: &[u8]) -> Option<(u64, &[u8])> {
    if wire.len() < SPAN_SIZE {
        return None;
    }
    let mut span_bytes = [0u8; SPAN_SIZE];
    span_bytes.copy_from_slice(&wire[..SPAN_SIZE]);
    Some((u64::from_le_bytes(span_bytes), &wire[SPAN_SIZE..]))
}
