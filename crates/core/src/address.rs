//! Content addresses and the binary-Merkle-tree address function.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{ADDRESS_SIZE, CHUNK_PAYLOAD_SIZE};

/// A 32-byte content address derived from a chunk's span and payload.
///
/// Equality is byte equality. The address doubles as the storage key on the
/// remote store and as the correctness oracle for verification: any mismatch
/// between a locally computed and a remotely reported address is an error,
/// never a warning.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkAddress([u8; ADDRESS_SIZE]);

impl ChunkAddress {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != ADDRESS_SIZE {
            return Err(crate::Error::InvalidAddress(format!(
                "expected {ADDRESS_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; ADDRESS_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// The all-zero placeholder address used by the index-document fork.
    pub fn zero() -> Self {
        Self([0u8; ADDRESS_SIZE])
    }

    /// Check whether this is the all-zero placeholder.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_SIZE]
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Compute the address of a chunk from its span and payload.
    ///
    /// The payload is zero-padded to 4096 bytes and folded through a binary
    /// Merkle tree (128 segments of 32 bytes, hashed pairwise down to one
    /// root); the address is the hash of the 8-byte little-endian span
    /// followed by that root. Pure and deterministic: identical input always
    /// yields an identical address, which is the basis for deduplication and
    /// for verifying remote storage.
    ///
    /// Callers guarantee `payload.len() <= 4096`; [`crate::Chunk`] enforces
    /// this at construction.
    pub fn for_content(span: u64, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= CHUNK_PAYLOAD_SIZE);
        let root = bmt_root(payload);
        let mut hasher = Sha256::new();
        hasher.update(span.to_le_bytes());
        hasher.update(root);
        Self(hasher.finalize().into())
    }

    /// Parse from a lowercase hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != ADDRESS_SIZE * 2 {
            return Err(crate::Error::InvalidAddress(format!(
                "expected {} hex chars, got {}",
                ADDRESS_SIZE * 2,
                s.len()
            )));
        }
        let mut bytes = [0u8; ADDRESS_SIZE];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(pair)
                .map_err(|e| crate::Error::InvalidAddress(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidAddress(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkAddress({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Binary Merkle tree root over the zero-padded payload.
///
/// The 4096-byte buffer is treated as 128 segments of 32 bytes; adjacent
/// pairs are hashed together repeatedly until a single 32-byte root remains.
fn bmt_root(payload: &[u8]) -> [u8; ADDRESS_SIZE] {
    let mut buf = [0u8; CHUNK_PAYLOAD_SIZE];
    buf[..payload.len()].copy_from_slice(payload);

    let mut width = CHUNK_PAYLOAD_SIZE;
    while width > ADDRESS_SIZE {
        let mut out = 0;
        for pair in (0..width).step_by(ADDRESS_SIZE * 2) {
            let mut hasher = Sha256::new();
            hasher.update(&buf[pair..pair + ADDRESS_SIZE * 2]);
            let digest: [u8; ADDRESS_SIZE] = hasher.finalize().into();
            buf[out..out + ADDRESS_SIZE].copy_from_slice(&digest);
            out += ADDRESS_SIZE;
        }
        width /= 2;
    }

    let mut root = [0u8; ADDRESS_SIZE];
    root.copy_from_slice(&buf[..ADDRESS_SIZE]);
    root
}
