//! Chunking, upload and verification pipeline for the apiary chunk store.
//!
//! The crate wires the pure core types into an async pipeline:
//! - [`store`]: the remote chunk store trait and its HTTP client
//! - [`chunker`]: the streaming Merkle chunker
//! - [`queue`]: the bounded-concurrency upload queue with retry
//! - [`upload`]: whole-input orchestration down to one manifest address
//! - [`cache`]: the local chunk cache
//! - [`verify`]: the independent verification read path

pub mod cache;
pub mod chunker;
pub mod error;
pub mod mime;
pub mod queue;
pub mod store;
pub mod upload;
pub mod verify;

pub use cache::{CachedChunk, ChunkCache};
pub use chunker::{ChunkSink, chunk_stream};
pub use error::{ClientError, Result, StoreError, StoreResult};
pub use mime::detect_mime;
pub use queue::{Progress, UploadQueue, UploadSummary};
pub use store::{ChunkStore, HttpChunkStore};
pub use upload::{PipelineResult, Uploader};
pub use verify::{
    VerifyOutcome, VerifyReport, VerifyStatus, Verifier, read_ledger, write_latency_report,
    write_ledger,
};
