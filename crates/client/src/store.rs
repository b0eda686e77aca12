//! Remote chunk store interface and its HTTP implementation.

use apiary_core::ChunkAddress;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::Deserialize;

use crate::error::{StoreError, StoreResult};

/// Header carrying the opaque authorization/quota token.
const STAMP_HEADER: &str = "apiary-stamp";

/// Header telling the store it may finalize the upload asynchronously.
const DEFERRED_HEADER: &str = "apiary-deferred";

/// A remote chunk store.
///
/// Chunks travel in wire form (8-byte little-endian span followed by the
/// payload) in both directions. The store derives the address from the bytes
/// it receives and reports it back; callers compare it against the locally
/// computed address.
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Upload one chunk; returns the address the store derived for it.
    async fn put_chunk(&self, wire: Bytes) -> StoreResult<ChunkAddress>;

    /// Fetch a chunk's wire bytes by address.
    async fn get_chunk(&self, address: ChunkAddress) -> StoreResult<Bytes>;

    /// Cheap existence probe, without transferring the chunk body.
    async fn is_retrievable(&self, address: ChunkAddress) -> StoreResult<bool>;
}

#[derive(Debug, Deserialize)]
struct ReferenceResponse {
    reference: String,
}

/// HTTP chunk store client.
#[derive(Clone)]
pub struct HttpChunkStore {
    http: reqwest::Client,
    base_url: Url,
    stamp: String,
    deferred: bool,
}

impl HttpChunkStore {
    /// Create a client for the store at `base_url`, authorizing uploads with
    /// the opaque `stamp` token.
    pub fn new(base_url: &str, stamp: &str, deferred: bool) -> StoreResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            stamp: stamp.to_string(),
            deferred,
        })
    }

    fn chunk_url(&self, address: Option<ChunkAddress>) -> StoreResult<Url> {
        let path = match address {
            Some(address) => format!("chunks/{address}"),
            None => "chunks".to_string(),
        };
        self.base_url
            .join(&path)
            .map_err(|e| StoreError::InvalidUrl(e.to_string()))
    }
}

async fn error_for_status(response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Status { status, body }
}

#[async_trait]
impl ChunkStore for HttpChunkStore {
    async fn put_chunk(&self, wire: Bytes) -> StoreResult<ChunkAddress> {
        let url = self.chunk_url(None)?;
        let response = self
            .http
            .post(url)
            .header(STAMP_HEADER, &self.stamp)
            .header(DEFERRED_HEADER, if self.deferred { "true" } else { "false" })
            .body(wire)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let body: ReferenceResponse = response
            .json()
            .await
            .map_err(|e| StoreError::BadResponse(e.to_string()))?;
        ChunkAddress::from_hex(&body.reference)
            .map_err(|e| StoreError::BadResponse(e.to_string()))
    }

    async fn get_chunk(&self, address: ChunkAddress) -> StoreResult<Bytes> {
        let url = self.chunk_url(Some(address))?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        Ok(response.bytes().await?)
    }

    async fn is_retrievable(&self, address: ChunkAddress) -> StoreResult<bool> {
        let url = self.chunk_url(Some(address))?;
        let response = self.http.head(url).send().await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        assert!(HttpChunkStore::new("not a url", "stamp", false).is_err());
    }

    #[test]
    fn test_chunk_urls() {
        let store = HttpChunkStore::new("http://127.0.0.1:1633/", "stamp", true).unwrap();
        assert_eq!(
            store.chunk_url(None).unwrap().as_str(),
            "http://127.0.0.1:1633/chunks"
        );
        let address = ChunkAddress::zero();
        assert_eq!(
            store.chunk_url(Some(address)).unwrap().as_str(),
            format!("http://127.0.0.1:1633/chunks/{address}")
        );
    }
}
