//! Independent verification read path.
//!
//! Re-fetches previously uploaded chunks and byte-compares them against the
//! local cache copies. Failures never abort a batch: they are classified,
//! collected into the error ledger and written to disk so a later pass can
//! retry exactly the failed subset without redoing successful work.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apiary_core::ChunkAddress;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Semaphore;

use crate::cache::{CachedChunk, ChunkCache, split_wire};
use crate::error::Result;
use crate::store::ChunkStore;

/// Classification of one verified address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyStatus {
    /// Present and byte-identical.
    Ok,
    /// The store reports the chunk as not retrievable.
    NotRetrievable,
    /// Fetched bytes differ from the local copy.
    Mismatch,
    /// The probe or fetch itself failed.
    FetchFailed,
}

impl VerifyStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Result of verifying one address, with its round-trip latency.
#[derive(Clone, Copy, Debug)]
pub struct VerifyOutcome {
    pub address: ChunkAddress,
    pub status: VerifyStatus,
    pub latency: Duration,
}

/// Aggregated verification results.
#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    pub outcomes: Vec<VerifyOutcome>,
}

impl VerifyReport {
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_ok()).count()
    }

    pub fn error_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// The error ledger: addresses that failed verification, sorted.
    pub fn ledger(&self) -> Vec<ChunkAddress> {
        let mut failed: Vec<_> = self
            .outcomes
            .iter()
            .filter(|o| !o.status.is_ok())
            .map(|o| o.address)
            .collect();
        failed.sort();
        failed
    }
}

/// Verifies cached chunks against the remote store with bounded concurrency.
pub struct Verifier {
    store: Arc<dyn ChunkStore>,
    cache: ChunkCache,
    concurrency: usize,
}

impl Verifier {
    pub fn new(store: Arc<dyn ChunkStore>, cache: ChunkCache, concurrency: usize) -> Self {
        Self {
            store,
            cache,
            concurrency: concurrency.max(1),
        }
    }

    /// Verify every chunk present in the local cache.
    pub async fn verify_all(&self) -> Result<VerifyReport> {
        let addresses = self.cache.list().await?;
        self.verify_addresses(addresses).await
    }

    /// Verify exactly the given addresses (a previous run's ledger).
    pub async fn verify_addresses(&self, addresses: Vec<ChunkAddress>) -> Result<VerifyReport> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = FuturesUnordered::new();

        for address in addresses {
            let store = self.store.clone();
            let cache = self.cache.clone();
            let semaphore = semaphore.clone();
            in_flight.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("verify semaphore closed");
                verify_one(store.as_ref(), &cache, address).await
            });
        }

        let mut report = VerifyReport::default();
        while let Some(outcome) = in_flight.next().await {
            let outcome = outcome?;
            if !outcome.status.is_ok() {
                tracing::warn!(
                    address = %outcome.address,
                    status = ?outcome.status,
                    "chunk failed verification"
                );
            }
            report.outcomes.push(outcome);
        }
        report.outcomes.sort_by_key(|o| o.address);
        Ok(report)
    }
}

async fn verify_one(
    store: &dyn ChunkStore,
    cache: &ChunkCache,
    address: ChunkAddress,
) -> Result<VerifyOutcome> {
    let local = cache.read(address).await?;
    let start = Instant::now();

    let status = match store.is_retrievable(address).await {
        Err(_) => VerifyStatus::FetchFailed,
        Ok(false) => VerifyStatus::NotRetrievable,
        Ok(true) => match store.get_chunk(address).await {
            Err(_) => VerifyStatus::FetchFailed,
            Ok(wire) => compare(&wire, &local),
        },
    };

    Ok(VerifyOutcome {
        address,
        status,
        latency: start.elapsed(),
    })
}

/// Compare remote wire bytes against the local copy: payload equality
/// always, span equality when the cache format recorded one.
fn compare(wire: &[u8], local: &CachedChunk) -> VerifyStatus {
    let Some((span, payload)) = split_wire(wire) else {
        return VerifyStatus::Mismatch;
    };
    if payload != local.payload {
        return VerifyStatus::Mismatch;
    }
    if let Some(local_span) = local.span
        && local_span != span
    {
        return VerifyStatus::Mismatch;
    }
    VerifyStatus::Ok
}

/// Persist the error ledger as a JSON array of hex addresses.
pub async fn write_ledger(path: &Path, ledger: &[ChunkAddress]) -> Result<()> {
    let hex: Vec<String> = ledger.iter().map(ChunkAddress::to_hex).collect();
    let json = serde_json::to_vec_pretty(&hex)
        .map_err(|e| apiary_core::Error::Serialization(e.to_string()))?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Load a previously written error ledger.
pub async fn read_ledger(path: &Path) -> Result<Vec<ChunkAddress>> {
    let bytes = tokio::fs::read(path).await?;
    let hex: Vec<String> = serde_json::from_slice(&bytes)
        .map_err(|e| apiary_core::Error::Serialization(e.to_string()))?;
    let mut addresses = Vec::with_capacity(hex.len());
    for entry in hex {
        addresses.push(ChunkAddress::from_hex(&entry)?);
    }
    Ok(addresses)
}

/// Persist the latency report as `<hex-address>\t<millis>` lines.
pub async fn write_latency_report(path: &Path, report: &VerifyReport) -> Result<()> {
    let mut out = String::new();
    for outcome in &report.outcomes {
        out.push_str(&outcome.address.to_hex());
        out.push('\t');
        out.push_str(&outcome.latency.as_millis().to_string());
        out.push('\n');
    }
    tokio::fs::write(path, out).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_compare_payload_only() {
        let local = CachedChunk {
            span: None,
            payload: Bytes::from_static(b"data"),
        };
        let mut wire = 4u64.to_le_bytes().to_vec();
        wire.extend_from_slice(b"data");
        assert_eq!(compare(&wire, &local), VerifyStatus::Ok);

        // A wrong span cannot be detected without a locally recorded one.
        let mut wrong_span = 7u64.to_le_bytes().to_vec();
        wrong_span.extend_from_slice(b"data");
        assert_eq!(compare(&wrong_span, &local), VerifyStatus::Ok);
    }

    #[test]
    fn test_compare_span_payload() {
        let local = CachedChunk {
            span: Some(4),
            payload: Bytes::from_static(b"data"),
        };
        let mut wire = 4u64.to_le_bytes().to_vec();
        wire.extend_from_slice(b"data");
        assert_eq!(compare(&wire, &local), VerifyStatus::Ok);

        let mut wrong_span = 5u64.to_le_bytes().to_vec();
        wrong_span.extend_from_slice(b"data");
        assert_eq!(compare(&wrong_span, &local), VerifyStatus::Mismatch);

        let mut wrong_payload = 4u64.to_le_bytes().to_vec();
        wrong_payload.extend_from_slice(b"dATa");
        assert_eq!(compare(&wrong_payload, &local), VerifyStatus::Mismatch);

        assert_eq!(compare(&[0u8; 3], &local), VerifyStatus::Mismatch);
    }

    #[tokio::test]
    async fn test_ledger_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ledger.json");
        let ledger = vec![
            ChunkAddress::for_content(1, b"a"),
            ChunkAddress::for_content(1, b"b"),
        ];
        write_ledger(&path, &ledger).await.unwrap();
        let loaded = read_ledger(&path).await.unwrap();
        assert_eq!(loaded, ledger);
    }

    #[tokio::test]
    async fn test_latency_report_format() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("report.tsv");
        let address = ChunkAddress::for_content(1, b"a");
        let report = VerifyReport {
            outcomes: vec![VerifyOutcome {
                address,
                status: VerifyStatus::Ok,
                latency: Duration::from_millis(42),
            }],
        };
        write_latency_report(&path, &report).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, format!("{}\t42\n", address.to_hex()));
    }
}
