//! Streaming Merkle chunker with bounded working memory.
//!
//! The chunker pulls up to 4096 bytes at a time from an async byte source,
//! emits each leaf chunk as soon as it is read, and cascades addresses
//! upward through one accumulation buffer per tree level. A level buffer
//! closes into an intermediate chunk when it holds 128 addresses or at
//! end-of-stream; closed chunks are emitted immediately and their address is
//! pushed to the level above. Working memory is one 4 KiB buffer per level,
//! O(log n) for an n-byte source, no matter how large the input is.

use apiary_core::{CHUNK_PAYLOAD_SIZE, Chunk, ChunkAddress};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ClientError, Result};

/// Destination for chunks as the chunker produces them.
///
/// `accept` may suspend; the chunker does not read further until it returns,
/// which is how the upload queue's backpressure reaches the producer.
pub trait ChunkSink {
    fn accept(&mut self, chunk: Chunk) -> impl Future<Output = Result<()>> + Send;
}

/// Collects chunks into a vector. Test and manifest-buffer helper.
impl ChunkSink for Vec<Chunk> {
    async fn accept(&mut self, chunk: Chunk) -> Result<()> {
        self.push(chunk);
        Ok(())
    }
}

/// One in-progress intermediate level: up to 128 child addresses plus the
/// sum of the covered spans and the number of chunks closed at this level so
/// far.
struct LevelBuffer {
    payload: Vec<u8>,
    span: u64,
    closed: u64,
    last_closed: Option<ChunkAddress>,
}

impl LevelBuffer {
    fn new() -> Self {
        Self {
            payload: Vec::with_capacity(CHUNK_PAYLOAD_SIZE),
            span: 0,
            closed: 0,
            last_closed: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    fn is_full(&self) -> bool {
        self.payload.len() == CHUNK_PAYLOAD_SIZE
    }

    fn push(&mut self, address: ChunkAddress, span: u64) {
        self.payload.extend_from_slice(address.as_bytes());
        self.span += span;
    }

    /// Drain the buffer into an intermediate chunk.
    fn close(&mut self) -> Result<Chunk> {
        let payload = Bytes::from(std::mem::take(&mut self.payload));
        let chunk = Chunk::intermediate(self.span, payload)?;
        self.span = 0;
        self.closed += 1;
        self.last_closed = Some(chunk.address());
        self.payload.reserve(CHUNK_PAYLOAD_SIZE);
        Ok(chunk)
    }
}

/// Push a closed chunk's address into the level above, cascading further
/// closes upward while buffers fill.
async fn push_up<S: ChunkSink>(
    levels: &mut Vec<LevelBuffer>,
    start: usize,
    address: ChunkAddress,
    span: u64,
    sink: &mut S,
) -> Result<()> {
    let mut level = start;
    let mut address = address;
    let mut span = span;
    loop {
        if levels.len() <= level {
            levels.push(LevelBuffer::new());
        }
        levels[level].push(address, span);
        if !levels[level].is_full() {
            return Ok(());
        }
        let chunk = levels[level].close()?;
        address = chunk.address();
        span = chunk.span();
        sink.accept(chunk).await?;
        level += 1;
    }
}

/// Read up to `CHUNK_PAYLOAD_SIZE` bytes, looping short reads until the
/// buffer is full or the source is exhausted.
async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; CHUNK_PAYLOAD_SIZE];
    let mut filled = 0;
    while filled < CHUNK_PAYLOAD_SIZE {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(ClientError::StreamRead)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Chunk a byte stream, emitting every produced chunk through `sink`, and
/// return the root address.
///
/// Leaves are emitted as soon as they are read, so uploading can begin
/// before the rest of the source has been consumed. A read error aborts the
/// stream immediately; chunks already emitted for it are orphaned and the
/// caller must not reference them from any manifest entry.
///
/// A source that yields no bytes at all produces exactly one leaf chunk with
/// span 0 and an empty payload, whose address is the root.
pub async fn chunk_stream<R, S>(reader: &mut R, sink: &mut S) -> Result<ChunkAddress>
where
    R: AsyncRead + Unpin,
    S: ChunkSink,
{
    let mut levels: Vec<LevelBuffer> = Vec::new();
    let mut leaves = 0u64;

    loop {
        let payload = read_payload(reader).await?;
        if payload.is_empty() {
            if leaves == 0 {
                let leaf = Chunk::leaf(Bytes::new())?;
                let root = leaf.address();
                sink.accept(leaf).await?;
                return Ok(root);
            }
            break;
        }

        leaves += 1;
        let short = payload.len() < CHUNK_PAYLOAD_SIZE;
        let leaf = Chunk::leaf(Bytes::from(payload))?;
        let (address, span) = (leaf.address(), leaf.span());
        sink.accept(leaf).await?;
        push_up(&mut levels, 0, address, span, sink).await?;
        if short {
            break;
        }
    }

    // End of stream: close the open buffers bottom-up. The first level whose
    // total closed chunk count is exactly one holds the root.
    let mut level = 0;
    loop {
        if !levels[level].is_empty() {
            let chunk = levels[level].close()?;
            let (address, span) = (chunk.address(), chunk.span());
            sink.accept(chunk).await?;
            push_up(&mut levels, level + 1, address, span, sink).await?;
        }
        if levels[level].closed == 1 {
            let root = levels[level]
                .last_closed
                .ok_or_else(|| ClientError::TaskFailed("chunker lost its root".to_string()))?;
            return Ok(root);
        }
        level += 1;
    }
}
