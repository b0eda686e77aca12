//! Path-trie manifest: maps paths to content addresses and serializes the
//! mapping itself through the chunk pipeline.
//!
//! The trie is built as an in-memory value first; [`ManifestTrie::save`] is a
//! pure serialization pass that encodes nodes children-before-parents and
//! feeds each node's bytes through [`crate::split`], so manifest data is
//! addressed exactly like payload data. Serialization is canonical: two
//! tries holding the same fork set produce bit-identical bytes and therefore
//! the same root address, regardless of insertion order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::address::ChunkAddress;
use crate::chunk::Chunk;
use crate::split::split;

/// Metadata key naming the original file.
pub const METADATA_FILENAME: &str = "Filename";

/// Metadata key carrying the detected MIME type.
pub const METADATA_CONTENT_TYPE: &str = "Content-Type";

/// Metadata key marking the manifest's default document. The fork lives at
/// the root path `/` and points at the all-zero placeholder address; the
/// value names the real default file. A routing hint, not a chunk reference.
pub const METADATA_INDEX_DOCUMENT: &str = "website-index-document";

const INDEX_PATH: &[u8] = b"/";

#[derive(Clone, Debug, Default)]
struct Node {
    // One fork per distinct first byte of an outgoing edge.
    forks: BTreeMap<u8, Fork>,
}

#[derive(Clone, Debug)]
struct Fork {
    prefix: Vec<u8>,
    target: Option<ChunkAddress>,
    metadata: BTreeMap<String, String>,
    node: Option<Box<Node>>,
}

/// Serialized form of a trie node. Field and map ordering are fixed, which
/// makes the postcard encoding canonical.
#[derive(Serialize, Deserialize)]
struct WireNode {
    forks: BTreeMap<u8, WireFork>,
}

#[derive(Serialize, Deserialize)]
struct WireFork {
    prefix: Vec<u8>,
    target: Option<ChunkAddress>,
    node: Option<ChunkAddress>,
    metadata: BTreeMap<String, String>,
}

/// A prefix trie over paths, each leaf fork carrying a content address and
/// string metadata. Common path prefixes share internal nodes.
#[derive(Clone, Debug, Default)]
pub struct ManifestTrie {
    root: Node,
    index_document: Option<String>,
}

impl ManifestTrie {
    /// Create an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path-to-address association with its metadata.
    ///
    /// Re-adding an existing path replaces its target and metadata.
    pub fn add_fork(
        &mut self,
        path: &[u8],
        target: ChunkAddress,
        metadata: BTreeMap<String, String>,
    ) -> crate::Result<()> {
        if path.is_empty() {
            return Err(crate::Error::EmptyPath);
        }
        insert(&mut self.root, path, target, metadata);
        Ok(())
    }

    /// Mark `path` as the manifest's default document.
    ///
    /// At most one default document may be set for a manifest.
    pub fn set_index_document(&mut self, path: &str) -> crate::Result<()> {
        if let Some(existing) = &self.index_document {
            return Err(crate::Error::IndexDocumentAlreadySet(existing.clone()));
        }
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_INDEX_DOCUMENT.to_string(), path.to_string());
        insert(&mut self.root, INDEX_PATH, ChunkAddress::zero(), metadata);
        self.index_document = Some(path.to_string());
        Ok(())
    }

    /// The default document path, if one was set.
    pub fn index_document(&self) -> Option<&str> {
        self.index_document.as_deref()
    }

    /// Whether no fork has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.root.forks.is_empty()
    }

    /// All registered fork paths, in lexicographic order.
    pub fn fork_paths(&self) -> Vec<Vec<u8>> {
        let mut paths = Vec::new();
        collect_paths(&self.root, Vec::new(), &mut paths);
        paths
    }

    /// Serialize the trie, passing every produced chunk to `sink` with
    /// children emitted before their parents, and return the root node's
    /// address.
    pub fn save(&self, sink: &mut dyn FnMut(Chunk)) -> crate::Result<ChunkAddress> {
        save_node(&self.root, sink)
    }
}

/// A decoded fork from a serialized trie node.
#[derive(Clone, Debug)]
pub struct ForkEntry {
    pub prefix: Vec<u8>,
    pub target: Option<ChunkAddress>,
    pub node: Option<ChunkAddress>,
    pub metadata: BTreeMap<String, String>,
}

/// Decode one serialized trie node into its forks, ordered by first byte.
pub fn decode_node(bytes: &[u8]) -> crate::Result<Vec<ForkEntry>> {
    let wire: WireNode =
        postcard::from_bytes(bytes).map_err(|e| crate::Error::Serialization(e.to_string()))?;
    Ok(wire
        .forks
        .into_values()
        .map(|fork| ForkEntry {
            prefix: fork.prefix,
            target: fork.target,
            node: fork.node,
            metadata: fork.metadata,
        })
        .collect())
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn insert(node: &mut Node, path: &[u8], target: ChunkAddress, metadata: BTreeMap<String, String>) {
    let Some(fork) = node.forks.get_mut(&path[0]) else {
        node.forks.insert(
            path[0],
            Fork {
                prefix: path.to_vec(),
                target: Some(target),
                metadata,
                node: None,
            },
        );
        return;
    };

    let common = common_prefix_len(&fork.prefix, path);
    if common == fork.prefix.len() {
        let rest = &path[common..];
        if rest.is_empty() {
            fork.target = Some(target);
            fork.metadata = metadata;
        } else {
            let child = fork.node.get_or_insert_with(Box::default);
            insert(child, rest, target, metadata);
        }
        return;
    }

    // The new path diverges inside this fork's prefix: split the fork at the
    // common point and push the old remainder down into a child node.
    let old_remainder = fork.prefix[common..].to_vec();
    let mut child = Node::default();
    child.forks.insert(
        old_remainder[0],
        Fork {
            prefix: old_remainder,
            target: fork.target.take(),
            metadata: std::mem::take(&mut fork.metadata),
            node: fork.node.take(),
        },
    );
    fork.prefix.truncate(common);

    let rest = &path[common..];
    if rest.is_empty() {
        fork.target = Some(target);
        fork.metadata = metadata;
    } else {
        insert(&mut child, rest, target, metadata);
    }
    fork.node = Some(Box::new(child));
}

fn collect_paths(node: &Node, prefix: Vec<u8>, out: &mut Vec<Vec<u8>>) {
    for fork in node.forks.values() {
        let mut path = prefix.clone();
        path.extend_from_slice(&fork.prefix);
        if fork.target.is_some() {
            out.push(path.clone());
        }
        if let Some(child) = &fork.node {
            collect_paths(child, path, out);
        }
    }
}

fn save_node(node: &Node, sink: &mut dyn FnMut(Chunk)) -> crate::Result<ChunkAddress> {
    let mut wire = WireNode {
        forks: BTreeMap::new(),
    };
    for (first, fork) in &node.forks {
        let child_address = match &fork.node {
            Some(child) => Some(save_node(child, sink)?),
            None => None,
        };
        wire.forks.insert(
            *first,
            WireFork {
                prefix: fork.prefix.clone(),
                target: fork.target,
                node: child_address,
                metadata: fork.metadata.clone(),
            },
        );
    }

    let bytes =
        postcard::to_allocvec(&wire).map_err(|e| crate::Error::Serialization(e.to_string()))?;
    let tree = split(&bytes);
    let root = tree.root();
    for chunk in tree.into_chunks() {
        sink(chunk);
    }
    Ok(root)
}
