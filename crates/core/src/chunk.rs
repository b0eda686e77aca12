//! Chunk values and their wire encoding.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::OnceLock;

use crate::address::ChunkAddress;
use crate::{ADDRESS_SIZE, BRANCHES, CHUNK_PAYLOAD_SIZE, SPAN_SIZE};

/// An immutable chunk: a logical span, at most 4096 payload bytes, and a
/// lazily derived content address.
///
/// Leaf chunks carry data and their span equals the payload length.
/// Intermediate chunks carry a concatenation of 32-byte child addresses and
/// their span is the sum of the covered children's spans. The address is
/// computed on first use and cached; a chunk never changes after
/// construction.
#[derive(Clone)]
pub struct Chunk {
    span: u64,
    payload: Bytes,
    address: OnceLock<ChunkAddress>,
}

impl Chunk {
    fn new_unchecked(span: u64, payload: Bytes) -> Self {
        Self {
            span,
            payload,
            address: OnceLock::new(),
        }
    }

    /// The single chunk produced by a zero-length input.
    pub(crate) fn new_empty_leaf() -> Self {
        Self::new_unchecked(0, Bytes::new())
    }

    /// Leaf constructor for callers that have already bounded the payload.
    pub(crate) fn new_leaf_unchecked(payload: Bytes) -> Self {
        debug_assert!(payload.len() <= CHUNK_PAYLOAD_SIZE);
        Self::new_unchecked(payload.len() as u64, payload)
    }

    /// Intermediate constructor for callers that have already validated the
    /// child-address payload.
    pub(crate) fn new_intermediate_unchecked(span: u64, payload: Bytes) -> Self {
        debug_assert!(!payload.is_empty() && payload.len() <= CHUNK_PAYLOAD_SIZE);
        debug_assert!(payload.len() % ADDRESS_SIZE == 0);
        Self::new_unchecked(span, payload)
    }

    /// Create a leaf chunk. The span is the payload length.
    pub fn leaf(payload: Bytes) -> crate::Result<Self> {
        if payload.len() > CHUNK_PAYLOAD_SIZE {
            return Err(crate::Error::PayloadTooLarge {
                size: payload.len(),
                max: CHUNK_PAYLOAD_SIZE,
            });
        }
        Ok(Self::new_unchecked(payload.len() as u64, payload))
    }

    /// Create an intermediate chunk from a child-address payload and the sum
    /// of the covered children's spans.
    pub fn intermediate(span: u64, payload: Bytes) -> crate::Result<Self> {
        if payload.len() > CHUNK_PAYLOAD_SIZE {
            return Err(crate::Error::PayloadTooLarge {
                size: payload.len(),
                max: CHUNK_PAYLOAD_SIZE,
            });
        }
        if payload.is_empty() || payload.len() % ADDRESS_SIZE != 0 {
            return Err(crate::Error::InvalidIntermediate(format!(
                "payload length {} is not a positive multiple of {ADDRESS_SIZE}",
                payload.len()
            )));
        }
        Ok(Self::new_unchecked(span, payload))
    }

    /// The logical number of bytes this chunk covers.
    pub fn span(&self) -> u64 {
        self.span
    }

    /// The span as its 8-byte little-endian wire form.
    pub fn span_bytes(&self) -> [u8; SPAN_SIZE] {
        self.span.to_le_bytes()
    }

    /// The chunk payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The content address, computed on first call and cached.
    pub fn address(&self) -> ChunkAddress {
        *self
            .address
            .get_or_init(|| ChunkAddress::for_content(self.span, &self.payload))
    }

    /// Number of child addresses in an intermediate chunk payload.
    pub fn child_count(&self) -> usize {
        self.payload.len() / ADDRESS_SIZE
    }

    /// Iterate over the child addresses of an intermediate chunk.
    ///
    /// For leaf chunks whose payload length happens to be a multiple of 32
    /// this has no meaning; callers track which level a chunk came from.
    pub fn child_addresses(&self) -> impl Iterator<Item = ChunkAddress> + '_ {
        self.payload.chunks_exact(ADDRESS_SIZE).map(|window| {
            let mut arr = [0u8; ADDRESS_SIZE];
            arr.copy_from_slice(window);
            ChunkAddress::from_bytes(arr)
        })
    }

    /// Encode as wire bytes: the 8-byte little-endian span followed by the
    /// payload. This is the byte form the remote store accepts and returns.
    pub fn to_wire(&self) -> Bytes {
        let mut wire = BytesMut::with_capacity(SPAN_SIZE + self.payload.len());
        wire.put_slice(&self.span_bytes());
        wire.put_slice(&self.payload);
        wire.freeze()
    }

    /// Decode from wire bytes.
    pub fn from_wire(wire: &[u8]) -> crate::Result<Self> {
        if wire.len() < SPAN_SIZE {
            return Err(crate::Error::MalformedWire(format!(
                "{} bytes is shorter than the span prefix",
                wire.len()
            )));
        }
        let payload = &wire[SPAN_SIZE..];
        if payload.len() > CHUNK_PAYLOAD_SIZE {
            return Err(crate::Error::MalformedWire(format!(
                "payload of {} bytes exceeds {CHUNK_PAYLOAD_SIZE}",
                payload.len()
            )));
        }
        let mut span_bytes = [0u8; SPAN_SIZE];
        span_bytes.copy_from_slice(&wire[..SPAN_SIZE]);
        Ok(Self::new_unchecked(
            u64::from_le_bytes(span_bytes),
            Bytes::copy_from_slice(payload),
        ))
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("span", &self.span)
            .field("payload_len", &self.payload.len())
            .field("address", &self.address())
            .finish()
    }
}

/// Advisory estimate of the number of chunks a byte stream of `size` bytes
/// will produce, including the root: `ceil(size / 4096)` leaves, each level
/// above dividing by 128 rounding up, plus one root chunk.
///
/// Used for progress reporting only, never for correctness.
pub fn estimate_chunk_count(size: u64) -> u64 {
    let leaves = size.div_ceil(CHUNK_PAYLOAD_SIZE as u64);
    let mut total = leaves;
    let mut width = leaves;
    while width > BRANCHES as u64 {
        let parents = width.div_ceil(BRANCHES as u64);
        total += parents;
        width = parents;
    }
    total + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_span_equals_payload_length() {
        let chunk = Chunk::leaf(Bytes::from_static(b"abc")).unwrap();
        assert_eq!(chunk.span(), 3);
        assert_eq!(chunk.payload().len(), 3);
    }

    #[test]
    fn test_leaf_rejects_oversized_payload() {
        let err = Chunk::leaf(Bytes::from(vec![0u8; CHUNK_PAYLOAD_SIZE + 1])).unwrap_err();
        assert!(matches!(err, crate::Error::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_intermediate_rejects_ragged_payload() {
        assert!(Chunk::intermediate(10, Bytes::from(vec![0u8; 33])).is_err());
        assert!(Chunk::intermediate(10, Bytes::new()).is_err());
        assert!(Chunk::intermediate(10, Bytes::from(vec![0u8; 64])).is_ok());
    }

    #[test]
    fn test_address_is_cached_and_stable() {
        let chunk = Chunk::leaf(Bytes::from_static(b"stable")).unwrap();
        let first = chunk.address();
        let second = chunk.address();
        assert_eq!(first, second);
        assert_eq!(first, ChunkAddress::for_content(6, b"stable"));
    }

    #[test]
    fn test_wire_roundtrip_preserves_address() {
        let chunk = Chunk::leaf(Bytes::from(vec![0x5A; 1808])).unwrap();
        let wire = chunk.to_wire();
        assert_eq!(wire.len(), SPAN_SIZE + 1808);
        assert_eq!(&wire[..SPAN_SIZE], &1808u64.to_le_bytes());

        let decoded = Chunk::from_wire(&wire).unwrap();
        assert_eq!(decoded.span(), chunk.span());
        assert_eq!(decoded.payload(), chunk.payload());
        assert_eq!(decoded.address(), chunk.address());
    }

    #[test]
    fn test_from_wire_rejects_short_and_oversized() {
        assert!(Chunk::from_wire(&[0u8; 7]).is_err());
        assert!(Chunk::from_wire(&[0u8; SPAN_SIZE]).is_ok());
        assert!(Chunk::from_wire(&vec![0u8; SPAN_SIZE + CHUNK_PAYLOAD_SIZE + 1]).is_err());
    }

    #[test]
    fn test_child_addresses() {
        let a = ChunkAddress::for_content(1, b"a");
        let b = ChunkAddress::for_content(1, b"b");
        let mut payload = Vec::new();
        payload.extend_from_slice(a.as_bytes());
        payload.extend_from_slice(b.as_bytes());
        let chunk = Chunk::intermediate(2, Bytes::from(payload)).unwrap();
        assert_eq!(chunk.child_count(), 2);
        let children: Vec<_> = chunk.child_addresses().collect();
        assert_eq!(children, vec![a, b]);
    }

    #[test]
    fn test_estimate_chunk_count() {
        // Zero-length input is a single (empty) chunk.
        assert_eq!(estimate_chunk_count(0), 1);
        // Anything up to one payload: leaf + root.
        assert_eq!(estimate_chunk_count(1), 2);
        assert_eq!(estimate_chunk_count(4096), 2);
        // The 10,000-byte scenario: 3 leaves + 1 root.
        assert_eq!(estimate_chunk_count(10_000), 4);
        // A full fan-out of leaves still folds into a single root.
        assert_eq!(estimate_chunk_count(4096 * 128), 129);
        // 200 leaves need an extra intermediate level: 200 + 2 + 1.
        assert_eq!(estimate_chunk_count(4096 * 200), 203);
    }
}
