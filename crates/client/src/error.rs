//! Error types for the upload and verification pipeline.

use apiary_core::ChunkAddress;
use thiserror::Error;

/// Error from a single interaction with the remote chunk store.
///
/// These are transient from the pipeline's point of view: the upload queue
/// retries them up to its configured budget and only escalates exhaustion.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store URL: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("address mismatch: expected {expected}, store reported {actual}")]
    AddressMismatch {
        expected: ChunkAddress,
        actual: ChunkAddress,
    },

    #[error("malformed store response: {0}")]
    BadResponse(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Pipeline error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// All attempts for one chunk failed; terminal for the enclosing drain.
    #[error("chunk {address} exhausted {attempts} upload attempts")]
    ExhaustedRetries {
        address: ChunkAddress,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Local I/O failure while reading source bytes. Aborts the current
    /// stream immediately; never retried.
    #[error("failed to read source: {0}")]
    StreamRead(std::io::Error),

    /// Local I/O failure in the chunk cache, ledger or report files.
    #[error("cache I/O error: {0}")]
    Cache(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] apiary_core::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("upload task failed: {0}")]
    TaskFailed(String),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ClientError>;
