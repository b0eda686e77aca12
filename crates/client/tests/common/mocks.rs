use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apiary_core::{Chunk, ChunkAddress};
use apiary_client::error::{StoreError, StoreResult};
use apiary_client::store::ChunkStore;
use async_trait::async_trait;
use bytes::Bytes;

/// In-memory chunk store with failure injection and concurrency
/// instrumentation, for exercising the upload queue and verifier without a
/// network.
pub struct MemoryChunkStore {
    chunks: Mutex<HashMap<ChunkAddress, Bytes>>,
    fail_remaining: AtomicU32,
    wrong_address: AtomicBool,
    put_delay: Duration,
    put_attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryChunkStore {
    pub fn new() -> Arc<Self> {
        Self::with_put_delay(Duration::ZERO)
    }

    /// A store whose puts take `delay`, so concurrent calls overlap and the
    /// instrumented maximum is meaningful.
    pub fn with_put_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            chunks: Mutex::new(HashMap::new()),
            fail_remaining: AtomicU32::new(0),
            wrong_address: AtomicBool::new(false),
            put_delay: delay,
            put_attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` put attempts fail with a server error.
    pub fn fail_next_puts(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Report a wrong address for every successful put.
    pub fn respond_with_wrong_address(&self, on: bool) {
        self.wrong_address.store(on, Ordering::SeqCst);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn contains(&self, address: ChunkAddress) -> bool {
        self.chunks.lock().unwrap().contains_key(&address)
    }

    /// Flip one payload byte of a stored chunk.
    pub fn corrupt(&self, address: ChunkAddress) {
        let mut chunks = self.chunks.lock().unwrap();
        let wire = chunks.get(&address).expect("chunk not stored");
        let mut bytes = wire.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        chunks.insert(address, Bytes::from(bytes));
    }

    pub fn remove(&self, address: ChunkAddress) {
        self.chunks.lock().unwrap().remove(&address);
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// Highest number of put calls that were ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put_chunk(&self, wire: Bytes) -> StoreResult<ChunkAddress> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }
        self.put_attempts.fetch_add(1, Ordering::SeqCst);

        let result = self.apply_put(&wire);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get_chunk(&self, address: ChunkAddress) -> StoreResult<Bytes> {
        self.chunks
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .ok_or_else(|| StoreError::Status {
                status: 404,
                body: "not found".to_string(),
            })
    }

    async fn is_retrievable(&self, address: ChunkAddress) -> StoreResult<bool> {
        Ok(self.contains(address))
    }
}

impl MemoryChunkStore {
    fn apply_put(&self, wire: &Bytes) -> StoreResult<ChunkAddress> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Status {
                status: 500,
                body: "injected failure".to_string(),
            });
        }

        let chunk = Chunk::from_wire(wire).map_err(|e| StoreError::BadResponse(e.to_string()))?;
        let address = chunk.address();
        self.chunks.lock().unwrap().insert(address, wire.clone());

        if self.wrong_address.load(Ordering::SeqCst) {
            let mut flipped = *address.as_bytes();
            flipped[0] ^= 0xFF;
            return Ok(ChunkAddress::from_bytes(flipped));
        }
        Ok(address)
    }
}
