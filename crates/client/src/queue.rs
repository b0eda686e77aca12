//! Bounded-concurrency chunk upload with retry.
//!
//! The queue decouples chunk production from upload I/O while bounding
//! memory: the producer acquires a semaphore permit per chunk before the
//! upload task is spawned, so at most `parallelism` chunks are in flight or
//! waiting at any time and the producer suspends once the bound is reached.
//! Each task retries with exponential backoff up to the configured budget;
//! only exhaustion escalates, at [`UploadQueue::drain`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use apiary_core::{Chunk, UploadOptions};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::ChunkCache;
use crate::chunker::ChunkSink;
use crate::error::{ClientError, Result, StoreError};
use crate::store::ChunkStore;

const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Shared progress counters, updated by upload tasks and rendered read-only
/// by the CLI.
#[derive(Debug, Default)]
pub struct Progress {
    /// Advisory total chunk count for the whole input, from the estimate.
    pub total_chunks: AtomicU64,
    /// Chunks confirmed by the store.
    pub uploaded_chunks: AtomicU64,
    /// Wire bytes confirmed by the store.
    pub uploaded_bytes: AtomicU64,
    /// Individual attempts that failed (retried or not).
    pub failed_attempts: AtomicU64,
}

/// Typed outcome of one successfully completed upload task.
#[derive(Clone, Copy, Debug)]
struct ChunkOutcome {
    attempts: u32,
    wire_bytes: u64,
}

/// Aggregated result of a drained queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Chunks confirmed by the store.
    pub uploaded_chunks: u64,
    /// Wire bytes confirmed by the store.
    pub uploaded_bytes: u64,
    /// Attempts beyond the first, across all chunks.
    pub retried_attempts: u64,
}

/// Bounded-concurrency upload queue over a [`ChunkStore`].
pub struct UploadQueue {
    store: Arc<dyn ChunkStore>,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Result<ChunkOutcome>>,
    retries: u32,
    cache: Option<Arc<ChunkCache>>,
    progress: Arc<Progress>,
}

impl UploadQueue {
    /// Create a queue uploading to `store` with the configured parallelism
    /// and retry budget.
    pub fn new(store: Arc<dyn ChunkStore>, options: &UploadOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            store,
            semaphore: Arc::new(Semaphore::new(options.parallelism)),
            tasks: JoinSet::new(),
            retries: options.retries,
            cache: None,
            progress: Arc::new(Progress::default()),
        })
    }

    /// Write successfully uploaded chunks through to a local cache.
    pub fn with_cache(mut self, cache: ChunkCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Share an externally owned progress handle instead of the queue's own.
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Handle to the shared progress counters.
    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    /// Register a chunk for upload.
    ///
    /// Suspends while `parallelism` tasks are already in flight or waiting;
    /// this is the backpressure bound that keeps peak memory at
    /// O(parallelism × chunk size) regardless of input size.
    pub async fn enqueue(&mut self, chunk: Chunk) {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("upload semaphore closed");

        let store = self.store.clone();
        let cache = self.cache.clone();
        let progress = self.progress.clone();
        let retries = self.retries;

        self.tasks.spawn(async move {
            let outcome = upload_with_retries(store.as_ref(), &chunk, retries, &progress).await?;
            if let Some(cache) = cache {
                cache.write(&chunk).await?;
            }
            progress.uploaded_chunks.fetch_add(1, Ordering::Relaxed);
            progress
                .uploaded_bytes
                .fetch_add(outcome.wire_bytes, Ordering::Relaxed);
            drop(permit);
            Ok(outcome)
        });
    }

    /// Suspend until every enqueued task has reached a terminal state.
    ///
    /// Returns the folded summary on success. If any task exhausted its
    /// retries the first such error is returned, but only after all remaining
    /// tasks have been driven to completion, so the store's view is settled
    /// either way.
    pub async fn drain(&mut self) -> Result<UploadSummary> {
        let mut summary = UploadSummary::default();
        let mut first_error: Option<ClientError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    summary.uploaded_chunks += 1;
                    summary.uploaded_bytes += outcome.wire_bytes;
                    summary.retried_attempts += u64::from(outcome.attempts - 1);
                }
                Ok(Err(error)) => {
                    first_error.get_or_insert(error);
                }
                Err(join_error) => {
                    first_error.get_or_insert(ClientError::TaskFailed(join_error.to_string()));
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(summary),
        }
    }
}

impl ChunkSink for UploadQueue {
    async fn accept(&mut self, chunk: Chunk) -> Result<()> {
        self.enqueue(chunk).await;
        Ok(())
    }
}

/// Upload one chunk, retrying failed attempts with exponential backoff.
///
/// The store's reported address must match the locally computed one; a
/// mismatch counts as a failed attempt like any transport error.
async fn upload_with_retries(
    store: &dyn ChunkStore,
    chunk: &Chunk,
    retries: u32,
    progress: &Progress,
) -> Result<ChunkOutcome> {
    let expected = chunk.address();
    let wire = chunk.to_wire();
    let mut last_error: Option<StoreError> = None;

    for attempt in 1..=retries {
        if attempt > 1 {
            // 1s, 2s, 4s, ... capped at 64s for deep retry budgets.
            tokio::time::sleep(BACKOFF_BASE * (1 << (attempt - 2).min(6))).await;
        }

        let error = match store.put_chunk(wire.clone()).await {
            Ok(actual) if actual == expected => {
                return Ok(ChunkOutcome {
                    attempts: attempt,
                    wire_bytes: wire.len() as u64,
                });
            }
            Ok(actual) => StoreError::AddressMismatch { expected, actual },
            Err(error) => error,
        };

        progress.failed_attempts.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            address = %expected,
            attempt,
            retries,
            error = %error,
            "chunk upload attempt failed"
        );
        last_error = Some(error);
    }

    Err(ClientError::ExhaustedRetries {
        address: expected,
        attempts: retries,
        source: last_error
            .unwrap_or_else(|| StoreError::BadResponse("no attempt was made".to_string())),
    })
}
