//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid intermediate payload: {0}")]
    InvalidIntermediate(String),

    #[error("malformed chunk wire data: {0}")]
    MalformedWire(String),

    #[error("manifest path must not be empty")]
    EmptyPath,

    #[error("index document already set to {0:?}")]
    IndexDocumentAlreadySet(String),

    #[error("manifest serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
