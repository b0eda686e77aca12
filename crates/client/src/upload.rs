//! Whole-input upload pipeline.
//!
//! Walks a file or directory tree, streams every file through the chunker
//! and upload queue, registers each file's root address in the manifest
//! trie, serializes the trie through the same queue, and drains before
//! reporting the manifest address. Drain success is the durability barrier:
//! no address is valid until every chunk, data and manifest alike, has been
//! confirmed by the store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use apiary_core::trie::{METADATA_CONTENT_TYPE, METADATA_FILENAME};
use apiary_core::{Chunk, ChunkAddress, ManifestTrie, UploadOptions, estimate_chunk_count};

use crate::cache::ChunkCache;
use crate::chunker::chunk_stream;
use crate::error::{ClientError, Result};
use crate::mime::detect_mime;
use crate::queue::{Progress, UploadQueue, UploadSummary};
use crate::store::ChunkStore;

const INDEX_DOCUMENT: &str = "index.html";

/// One source file scheduled for upload.
#[derive(Clone, Debug)]
struct SourceFile {
    absolute: PathBuf,
    relative: String,
    size: u64,
}

/// Result of a completed upload: every file's root address and the manifest
/// address, plus the drained queue's summary.
#[derive(Clone, Debug)]
pub struct PipelineResult {
    pub manifest: ChunkAddress,
    pub files: Vec<(String, ChunkAddress)>,
    pub summary: UploadSummary,
}

/// Uploads files and directories to a chunk store.
pub struct Uploader {
    store: Arc<dyn ChunkStore>,
    options: UploadOptions,
    progress: Arc<Progress>,
}

impl Uploader {
    pub fn new(store: Arc<dyn ChunkStore>, options: UploadOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            store,
            options,
            progress: Arc::new(Progress::default()),
        })
    }

    /// Handle to the shared progress counters, for rendering.
    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    /// Upload a file or directory tree; returns only after every chunk has
    /// been durably accepted.
    pub async fn upload_path(&self, input: &Path) -> Result<PipelineResult> {
        let files = collect_files(input)?;
        let estimate: u64 = files.iter().map(|f| estimate_chunk_count(f.size)).sum();
        self.progress
            .total_chunks
            .store(estimate + 1, Ordering::Relaxed);

        let mut queue = UploadQueue::new(self.store.clone(), &self.options)?
            .with_progress(self.progress.clone());
        if self.options.cache_chunks {
            queue = queue.with_cache(ChunkCache::new(
                &self.options.cache_dir,
                self.options.cache_format,
            ));
        }

        let mut trie = ManifestTrie::new();
        let mut file_roots = Vec::with_capacity(files.len());

        for file in &files {
            let mut reader = tokio::fs::File::open(&file.absolute)
                .await
                .map_err(ClientError::StreamRead)?;
            let root = chunk_stream(&mut reader, &mut queue).await?;
            tracing::info!(path = %file.relative, address = %root, "file chunked");

            let filename = file
                .relative
                .rsplit('/')
                .next()
                .unwrap_or(&file.relative)
                .to_string();
            let mut metadata = BTreeMap::new();
            metadata.insert(METADATA_CONTENT_TYPE.to_string(), detect_mime(&filename).to_string());
            metadata.insert(METADATA_FILENAME.to_string(), filename);
            trie.add_fork(file.relative.as_bytes(), root, metadata)?;
            file_roots.push((file.relative.clone(), root));
        }

        if let [only] = file_roots.as_slice() {
            trie.set_index_document(&only.0)?;
        } else if file_roots.iter().any(|(path, _)| path == INDEX_DOCUMENT) {
            trie.set_index_document(INDEX_DOCUMENT)?;
        }

        // The manifest is addressed like any other payload: serialize the
        // trie and push its chunks through the same queue.
        let mut manifest_chunks: Vec<Chunk> = Vec::new();
        let manifest = trie.save(&mut |chunk| manifest_chunks.push(chunk))?;
        for chunk in manifest_chunks {
            queue.enqueue(chunk).await;
        }

        let summary = queue.drain().await?;
        tracing::info!(
            manifest = %manifest,
            chunks = summary.uploaded_chunks,
            bytes = summary.uploaded_bytes,
            "upload complete"
        );

        Ok(PipelineResult {
            manifest,
            files: file_roots,
            summary,
        })
    }
}

/// Collect the files to upload.
///
/// A single file yields one entry keyed by its file name. A directory is
/// walked lazily, files only, and entries are keyed by their relative path
/// with `/` separators, in sorted order for reproducible manifests.
fn collect_files(input: &Path) -> Result<Vec<SourceFile>> {
    let metadata = std::fs::metadata(input).map_err(ClientError::StreamRead)?;

    if metadata.is_file() {
        let relative = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.to_string_lossy().into_owned());
        return Ok(vec![SourceFile {
            absolute: input.to_path_buf(),
            relative,
            size: metadata.len(),
        }]);
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(input).follow_links(false) {
        let entry = entry.map_err(|e| ClientError::StreamRead(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map(|m| m.len())
            .map_err(|e| ClientError::StreamRead(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(input)
            .map_err(|e| ClientError::TaskFailed(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(SourceFile {
            absolute: entry.path().to_path_buf(),
            relative,
            size,
        });
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_files_sorted_relative_paths() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("sub/b.txt"), b"b").unwrap();
        std::fs::write(temp.path().join("a.txt"), b"aaa").unwrap();

        let files = collect_files(temp.path()).unwrap();
        let relative: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(relative, vec!["a.txt", "sub/b.txt"]);
        assert_eq!(files[0].size, 3);
    }

    #[test]
    fn test_collect_single_file_uses_basename() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("only.bin");
        std::fs::write(&path, b"x").unwrap();

        let files = collect_files(&path).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, "only.bin");
    }

    #[test]
    fn test_collect_missing_path_is_stream_read_error() {
        let temp = tempfile::tempdir().unwrap();
        let result = collect_files(&temp.path().join("nope"));
        assert!(matches!(result, Err(ClientError::StreamRead(_))));
    }
}
