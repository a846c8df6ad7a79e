//! In-memory vector index with JSON file persistence (variant used by the
//! manual RAG backend).
//!
//! The entire state is serialized to a single JSON file after every `add`
//! and on `reset`, using write-then-rename so a crash mid-write can at worst
//! lose that one write. On startup the file is loaded if present; a format
//! version or embedding-model mismatch discards it with a warning and the
//! index starts empty.

use super::{VectorIndex, cosine_similarity, take_top_k, validate_batch};
use crate::types::{Chunk, IndexStats, ScoredChunk};
use crate::utils::write_atomic;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Bumped when the persisted layout changes; a mismatch discards the file.
const FORMAT_VERSION: u32 = 1;

/// On-disk shape: `{version, embedding_model_name, chunks: [...]}`.
#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    embedding_model_name: String,
    chunks: Vec<Chunk>,
}

/// Naive dense in-memory index, optionally persisted to a JSON file.
pub struct MemoryIndex {
    embedding_model: String,
    path: Option<PathBuf>,
    chunks: RwLock<Vec<Chunk>>,
}

impl MemoryIndex {
    /// Create an index for `embedding_model`. When `path` is set, an
    /// existing compatible snapshot at that path is loaded; otherwise the
    /// index starts empty.
    pub fn new(embedding_model: impl Into<String>, path: Option<PathBuf>) -> Self {
        let embedding_model = embedding_model.into();
        let chunks = path
            .as_deref()
            .map(|p| load_snapshot(p, &embedding_model))
            .unwrap_or_default();

        Self {
            embedding_model,
            path,
            chunks: RwLock::new(chunks),
        }
    }

    /// Serialize the current state to the configured path, if any. Called
    /// while holding the write lock, which serializes persistence writes.
    fn persist(&self, chunks: &[Chunk]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = PersistedIndex {
            version: FORMAT_VERSION,
            embedding_model_name: self.embedding_model.clone(),
            chunks: chunks.to_vec(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        write_atomic(path, &bytes)
    }
}

fn load_snapshot(path: &std::path::Path, embedding_model: &str) -> Vec<Chunk> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            log::warn!("vector index file {} unreadable ({e}); starting empty", path.display());
            return Vec::new();
        }
    };

    let snapshot: PersistedIndex = match serde_json::from_slice(&bytes) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("vector index file {} corrupt ({e}); starting empty", path.display());
            return Vec::new();
        }
    };

    if snapshot.version != FORMAT_VERSION {
        log::warn!(
            "vector index file {} has format v{} (expected v{FORMAT_VERSION}); starting empty",
            path.display(),
            snapshot.version
        );
        return Vec::new();
    }
    if snapshot.embedding_model_name != embedding_model {
        log::warn!(
            "vector index file {} was built with embedding model {:?} (configured: {:?}); starting empty",
            path.display(),
            snapshot.embedding_model_name,
            embedding_model
        );
        return Vec::new();
    }

    log::info!(
        "loaded {} chunks from {}",
        snapshot.chunks.len(),
        path.display()
    );
    snapshot.chunks
}

impl VectorIndex for MemoryIndex {
    fn add(&self, new_chunks: Vec<Chunk>) -> Result<usize> {
        if new_chunks.is_empty() {
            return Ok(0);
        }

        let mut guard = self
            .chunks
            .write()
            .map_err(|_| Error::index("index lock poisoned"))?;

        let existing_dim = guard.first().map(|c| c.embedding.len());
        validate_batch(existing_dim, &new_chunks)?;

        let added = new_chunks.len();
        guard.extend(new_chunks);
        self.persist(&guard)?;
        Ok(added)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&[String]>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let guard = self
            .chunks
            .read()
            .map_err(|_| Error::index("index lock poisoned"))?;

        let scored: Vec<ScoredChunk> = guard
            .iter()
            .filter(|c| match filter {
                Some(sources) => sources.iter().any(|s| s == &c.source),
                None => true,
            })
            .map(|c| ScoredChunk {
                score: cosine_similarity(query, &c.embedding),
                chunk: c.clone(),
            })
            .collect();

        Ok(take_top_k(scored, k))
    }

    fn stats(&self) -> Result<IndexStats> {
        let guard = self
            .chunks
            .read()
            .map_err(|_| Error::index("index lock poisoned"))?;

        let mut per_source: BTreeMap<String, usize> = BTreeMap::new();
        for chunk in guard.iter() {
            *per_source.entry(chunk.source.clone()).or_insert(0) += 1;
        }

        Ok(IndexStats {
            chunk_count: guard.len(),
            per_source,
            embedding_model: self.embedding_model.clone(),
        })
    }

    fn reset(&self) -> Result<()> {
        let mut guard = self
            .chunks
            .write()
            .map_err(|_| Error::index("index lock poisoned"))?;
        guard.clear();
        self.persist(&guard)
    }
}
