//! Upload pipeline configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options recognized by the upload pipeline.
///
/// Loaded by the CLI from a TOML file and `APIARY_*` environment variables,
/// with command-line flags taking precedence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Remote chunk store endpoint.
    #[serde(default = "default_store_url")]
    pub store_url: String,
    /// Opaque authorization/quota token, passed through to the store
    /// unmodified.
    #[serde(default = "default_stamp")]
    pub stamp: String,
    /// Whether the store may finalize uploads asynchronously.
    #[serde(default = "default_deferred")]
    pub deferred: bool,
    /// Maximum number of chunk uploads in flight at once.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Upload attempts per chunk before giving up.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Write successfully uploaded chunks to the local cache directory.
    #[serde(default)]
    pub cache_chunks: bool,
    /// Directory for locally cached chunks, the error ledger and the
    /// latency report.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// On-disk format for cached chunks.
    #[serde(default)]
    pub cache_format: CacheFormat,
}

/// On-disk format of a cached chunk file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheFormat {
    /// Payload bytes only.
    #[default]
    Payload,
    /// The full wire form: 8-byte little-endian span, then payload.
    SpanPayload,
}

impl UploadOptions {
    /// Validate option ranges.
    pub fn validate(&self) -> crate::Result<()> {
        if self.parallelism < 1 {
            return Err(crate::Error::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.retries < 1 {
            return Err(crate::Error::InvalidConfig(
                "retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            stamp: default_stamp(),
            deferred: default_deferred(),
            parallelism: default_parallelism(),
            retries: default_retries(),
            cache_chunks: false,
            cache_dir: default_cache_dir(),
            cache_format: CacheFormat::default(),
        }
    }
}

fn default_store_url() -> String {
    "http://127.0.0.1:1633".to_string()
}

fn default_stamp() -> String {
    "0".repeat(64)
}

fn default_deferred() -> bool {
    true
}

fn default_parallelism() -> usize {
    8
}

fn default_retries() -> u32 {
    5
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("chunk-data")
}
