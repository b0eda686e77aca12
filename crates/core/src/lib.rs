//! Core domain types and algorithms for the apiary chunk pipeline.
//!
//! This crate defines the canonical data model shared by the upload client
//! and the CLI:
//! - Content addresses and the binary-Merkle-tree address function
//! - The chunk value type and its wire encoding
//! - In-memory splitting of byte buffers into complete chunk trees
//! - The path-trie manifest and its deterministic serialization
//! - Upload options and validation
//!
//! Everything here is pure: no I/O, no async, no shared mutable state.

pub mod address;
pub mod chunk;
pub mod config;
pub mod error;
pub mod split;
pub mod trie;

pub use address::ChunkAddress;
pub use chunk::{Chunk, estimate_chunk_count};
pub use config::{CacheFormat, UploadOptions};
pub use error::{Error, Result};
pub use split::{ChunkTree, split};
pub use trie::ManifestTrie;

/// Maximum chunk payload size: 4 KiB.
pub const CHUNK_PAYLOAD_SIZE: usize = 4096;

/// Size of a content address in bytes.
pub const ADDRESS_SIZE: usize = 32;

/// Size of the little-endian span prefix in bytes.
pub const SPAN_SIZE: usize = 8;

/// Maximum number of children an intermediate chunk can reference.
pub const BRANCHES: usize = CHUNK_PAYLOAD_SIZE / ADDRESS_SIZE;
