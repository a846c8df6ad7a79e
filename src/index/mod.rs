//! Vector index contract and the shared similarity math.
//!
//! Two interchangeable variants implement [`VectorIndex`]:
//!
//! - [`MemoryIndex`]: a plain in-memory collection, serialized to one JSON
//!   file on every add (the manual backend's store).
//! - [`SqliteIndex`]: a SQLite-backed store, either `:memory:` (flat mode)
//!   or a database file inside a configured directory (persistent mode); the
//!   framework backend's store.
//!
//! Both compute exact cosine similarity over the candidate set; the
//! source filter narrows candidates before scoring. `add` must be atomic
//! with respect to concurrent `search`: readers observe the pre-add or
//! post-add state, never a partial one. Both variants guarantee that with
//! interior locking, which also serializes their persistence writes.

mod memory;
mod sqlite;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

use crate::types::{Chunk, IndexStats, ScoredChunk};
use crate::{Error, Result};

/// Storage contract shared by both index variants.
///
/// Methods take `&self`; every implementation synchronizes internally
/// (many concurrent readers, one writer). `add` also performs file I/O, so
/// async callers dispatch it through `spawn_blocking`.
pub trait VectorIndex: Send + Sync {
    /// Append `chunks`. All-or-nothing; returns the number added.
    fn add(&self, chunks: Vec<Chunk>) -> Result<usize>;

    /// Top-`k` chunks by cosine similarity against `query`, optionally
    /// restricted to the given sources. Ties break toward earlier insertion.
    /// Scores at or below zero are still returned when inside the top-k.
    fn search(&self, query: &[f32], k: usize, filter: Option<&[String]>)
    -> Result<Vec<ScoredChunk>>;

    /// Chunk count, per-source counts, and the embedding model name.
    fn stats(&self) -> Result<IndexStats>;

    /// Drop every chunk.
    fn reset(&self) -> Result<()>;
}

/// Cosine similarity between two vectors: `(a . b) / (|a| * |b|)`, in
/// `[-1, 1]`. A zero vector (or a length mismatch, which a well-formed index
/// never produces) scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Keep the `k` best-scored chunks, descending. The input must be in
/// insertion order; the stable sort then breaks score ties toward the
/// earlier chunk.
pub(crate) fn take_top_k(mut scored: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(k);
    scored
}

/// Validate a batch before insertion: non-empty sources, and a uniform
/// embedding dimension matching `existing_dim` (when the index already holds
/// vectors).
pub(crate) fn validate_batch(existing_dim: Option<usize>, chunks: &[Chunk]) -> Result<()> {
    let mut expected = existing_dim;
    for chunk in chunks {
        if chunk.source.trim().is_empty() {
            return Err(Error::index("chunk has an empty source"));
        }
        if chunk.embedding.is_empty() {
            return Err(Error::index(format!(
                "chunk {} has an empty embedding",
                chunk.id
            )));
        }
        match expected {
            Some(dim) if dim != chunk.embedding.len() => {
                return Err(Error::index(format!(
                    "embedding dimension mismatch: index holds {dim}, chunk {} has {}",
                    chunk.id,
                    chunk.embedding.len()
                )));
            }
            Some(_) => {}
            None => expected = Some(chunk.embedding.len()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, source: &str, embedding: Vec<f32>) -> Chunk {
        Chunk::new(text, source, embedding)
    }

    #[test]
    fn test_cosine_parallel_vectors() {
        let score = cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let score = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(score.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposed_vectors() {
        let score = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_dimension_mismatch_scores_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_take_top_k_sorts_descending_and_truncates() {
        let scored = vec![
            ScoredChunk {
                chunk: chunk("low", "s", vec![1.0]),
                score: 0.1,
            },
            ScoredChunk {
                chunk: chunk("high", "s", vec![1.0]),
                score: 0.9,
            },
            ScoredChunk {
                chunk: chunk("mid", "s", vec![1.0]),
                score: 0.5,
            },
        ];
        let top = take_top_k(scored, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].chunk.text, "high");
        assert_eq!(top[1].chunk.text, "mid");
    }

    #[test]
    fn test_take_top_k_breaks_ties_by_insertion_order() {
        let scored = vec![
            ScoredChunk {
                chunk: chunk("first", "s", vec![1.0]),
                score: 0.5,
            },
            ScoredChunk {
                chunk: chunk("second", "s", vec![1.0]),
                score: 0.5,
            },
        ];
        let top = take_top_k(scored, 1);
        assert_eq!(top[0].chunk.text, "first");
    }

    #[test]
    fn test_take_top_k_keeps_non_positive_scores() {
        let scored = vec![ScoredChunk {
            chunk: chunk("anti", "s", vec![1.0]),
            score: -0.4,
        }];
        let top = take_top_k(scored, 3);
        assert_eq!(top.len(), 1);
        assert!(top[0].score < 0.0);
    }

    #[test]
    fn test_validate_batch_rejects_empty_source() {
        let bad = vec![chunk("text", "  ", vec![1.0])];
        assert!(validate_batch(None, &bad).is_err());
    }

    #[test]
    fn test_validate_batch_rejects_mixed_dimensions() {
        let bad = vec![
            chunk("a", "s", vec![1.0, 0.0]),
            chunk("b", "s", vec![1.0, 0.0, 0.0]),
        ];
        assert!(validate_batch(None, &bad).is_err());
    }

    #[test]
    fn test_validate_batch_enforces_existing_dimension() {
        let chunks = vec![chunk("a", "s", vec![1.0, 0.0])];
        assert!(validate_batch(Some(3), &chunks).is_err());
        assert!(validate_batch(Some(2), &chunks).is_ok());
    }
}
