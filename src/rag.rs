//! RAG backends: ingestion, retrieval, and context assembly.
//!
//! Two backends expose one capability set (`ingest_text`, `ingest_file`,
//! `build_context`, `stats`, `reset`); they differ only in chunking strategy
//! and index variant:
//!
//! | backend | chunking | index |
//! |---------|----------|-------|
//! | manual | fixed character windows | in-memory, JSON-persisted |
//! | framework | recursive separator splitting | SQLite (flat or persistent) |
//!
//! Both are constructed once at startup and shared by reference; the index
//! inside each one is the only mutable state, and it synchronizes itself.
//! Ingestion is all-or-nothing per call: every chunk is embedded first, and
//! only a fully embedded batch reaches the index.

use crate::chunker::Chunker;
use crate::document;
use crate::index::{MemoryIndex, SqliteIndex, VectorIndex};
use crate::llm::LlmProvider;
use crate::types::{BackendKind, Chunk, IndexStats, ScoredChunk, VectorStoreMode};
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Separator between context blocks in an assembled prompt.
const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// How a backend slices text before embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkStrategy {
    Fixed,
    Recursive,
}

/// Tunables shared by both backends.
#[derive(Debug, Clone)]
pub struct RagSettings {
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_context_chars: usize,
    /// Write-through store for raw uploaded bytes; never read back.
    pub upload_dir: Option<PathBuf>,
}

/// Backend metadata plus the underlying index stats.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub backend: BackendKind,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub index: IndexStats,
}

/// One complete ingestion-and-retrieval stack.
pub struct RagBackend {
    kind: BackendKind,
    strategy: ChunkStrategy,
    chunker: Chunker,
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmProvider>,
    settings: RagSettings,
}

impl RagBackend {
    /// Manual backend: fixed-window chunking over an in-memory index that
    /// persists to `index_file` as JSON (when set).
    pub fn manual(
        settings: RagSettings,
        llm: Arc<dyn LlmProvider>,
        index_file: Option<PathBuf>,
    ) -> Result<Self> {
        let chunker = Chunker::new(settings.chunk_size, settings.chunk_overlap)?;
        let index: Arc<dyn VectorIndex> =
            Arc::new(MemoryIndex::new(settings.embedding_model.clone(), index_file));
        Ok(Self {
            kind: BackendKind::Manual,
            strategy: ChunkStrategy::Fixed,
            chunker,
            index,
            llm,
            settings,
        })
    }

    /// Framework backend: recursive-separator chunking over a SQLite store,
    /// either flat (in-memory) or persistent under `dir`.
    pub fn framework(
        settings: RagSettings,
        llm: Arc<dyn LlmProvider>,
        mode: VectorStoreMode,
        dir: &Path,
    ) -> Result<Self> {
        let chunker = Chunker::new(settings.chunk_size, settings.chunk_overlap)?;
        let index: Arc<dyn VectorIndex> = match mode {
            VectorStoreMode::Flat => {
                Arc::new(SqliteIndex::open_flat(settings.embedding_model.clone())?)
            }
            VectorStoreMode::Persistent => Arc::new(SqliteIndex::open_persistent(
                settings.embedding_model.clone(),
                dir,
            )?),
        };
        Ok(Self {
            kind: BackendKind::Framework,
            strategy: ChunkStrategy::Recursive,
            chunker,
            index,
            llm,
            settings,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn default_top_k(&self) -> usize {
        self.settings.top_k
    }

    /// Chunk `text`, embed every chunk, and insert the batch. Returns the
    /// number of chunks added. Any embedding failure aborts the whole call
    /// with the index untouched.
    pub async fn ingest_text(&self, text: &str, source: &str) -> Result<usize> {
        if source.trim().is_empty() {
            return Err(Error::config("ingestion source must not be empty"));
        }

        let pieces = match self.strategy {
            ChunkStrategy::Fixed => self.chunker.split_fixed(text),
            ChunkStrategy::Recursive => self.chunker.split_recursive(text),
        };
        if pieces.is_empty() {
            return Ok(0);
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            let embedding = self
                .llm
                .embed(&self.settings.embedding_model, piece)
                .await
                .map_err(|e| Error::embedding(format!("{source}: {e}")))?;
            chunks.push(Chunk::new(piece.clone(), source, embedding));
        }

        let index = self.index.clone();
        let added = tokio::task::spawn_blocking(move || index.add(chunks))
            .await
            .map_err(|e| Error::index(format!("index write task failed: {e}")))??;

        log::info!(
            "[{}] ingested {added} chunks from {source}",
            self.kind.as_str()
        );
        Ok(added)
    }

    /// Parse an uploaded file and ingest its text under the file's name.
    /// The raw bytes are written through to the upload directory first (when
    /// configured); parser errors propagate to the caller.
    pub async fn ingest_file(&self, filename: &str, bytes: &[u8]) -> Result<usize> {
        self.store_upload(filename, bytes)?;
        let text = document::parse(filename, bytes)?;
        self.ingest_text(&text, filename).await
    }

    /// Embed `query`, search the index, and assemble a context string capped
    /// at `max_context_chars`. Returns the context plus the retrieved chunks.
    pub async fn build_context(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&[String]>,
    ) -> Result<(String, Vec<ScoredChunk>)> {
        let query_vector = self
            .llm
            .embed(&self.settings.embedding_model, query)
            .await
            .map_err(|e| Error::embedding(format!("query embedding failed: {e}")))?;

        let retrieved = self.index.search(&query_vector, top_k, filter)?;
        let context = assemble_context(&retrieved, self.settings.max_context_chars);
        Ok((context, retrieved))
    }

    pub fn stats(&self) -> Result<BackendStats> {
        Ok(BackendStats {
            backend: self.kind,
            chunk_size: self.settings.chunk_size,
            chunk_overlap: self.settings.chunk_overlap,
            top_k: self.settings.top_k,
            max_context_chars: self.settings.max_context_chars,
            index: self.index.stats()?,
        })
    }

    pub fn reset(&self) -> Result<()> {
        self.index.reset()
    }

    /// Number of indexed chunks whose source is in `filter` (all when none).
    pub fn matching_chunks(&self, filter: Option<&[String]>) -> Result<usize> {
        Ok(self.index.stats()?.matching(filter))
    }

    /// Write raw upload bytes under the upload directory, keyed by the
    /// file's base name (collisions overwrite). Path components in the
    /// client-supplied name are stripped.
    fn store_upload(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let Some(dir) = &self.settings.upload_dir else {
            return Ok(());
        };
        let Some(base) = Path::new(filename).file_name() else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(base), bytes)?;
        Ok(())
    }
}

/// Format retrieved chunks into a prompt context:
/// `Source: <source>\n<text>` blocks joined by a fixed separator, truncated
/// so the total character count never exceeds `max_chars`. Truncation
/// prefers dropping whole blocks; only a first block that alone exceeds the
/// budget is cut mid-text.
pub fn assemble_context(retrieved: &[ScoredChunk], max_chars: usize) -> String {
    let mut out = String::new();
    let mut out_chars = 0usize;
    let sep_chars = CONTEXT_SEPARATOR.chars().count();

    for scored in retrieved {
        let block = format!("Source: {}\n{}", scored.chunk.source, scored.chunk.text);
        let block_chars = block.chars().count();

        let needed = if out.is_empty() {
            block_chars
        } else {
            out_chars + sep_chars + block_chars
        };

        if needed <= max_chars {
            if !out.is_empty() {
                out.push_str(CONTEXT_SEPARATOR);
                out_chars += sep_chars;
            }
            out.push_str(&block);
            out_chars += block_chars;
        } else if out.is_empty() {
            // Even the best chunk alone is over budget; a plain character
            // cut is acceptable here.
            out = block.chars().take(max_chars).collect();
            break;
        } else {
            break;
        }
    }

    out
}

// ============================================================================
// UNIFIED INGESTION
// ============================================================================

/// Per-backend result of a unified ingestion call.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub backend: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_added: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestOutcome {
    fn from_result(backend: BackendKind, result: Result<usize>) -> Self {
        match result {
            Ok(added) => Self {
                backend,
                chunks_added: Some(added),
                error: None,
            },
            Err(e) => Self {
                backend,
                chunks_added: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Outcome of writing one upload into both backends.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestReport {
    pub fn all_failed(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_some())
    }
}

/// Ingest a file upload into both backends in sequence, best-effort: a
/// failure in one backend does not abort the other, and the report carries
/// one outcome per backend.
pub async fn ingest_file_both(
    manual: &RagBackend,
    framework: &RagBackend,
    filename: &str,
    bytes: &[u8],
) -> IngestReport {
    let manual_result = manual.ingest_file(filename, bytes).await;
    let framework_result = framework.ingest_file(filename, bytes).await;
    IngestReport {
        source: filename.to_string(),
        outcomes: vec![
            IngestOutcome::from_result(manual.kind(), manual_result),
            IngestOutcome::from_result(framework.kind(), framework_result),
        ],
    }
}

/// Ingest raw text into both backends in sequence, best-effort.
pub async fn ingest_text_both(
    manual: &RagBackend,
    framework: &RagBackend,
    text: &str,
    source: &str,
) -> IngestReport {
    let manual_result = manual.ingest_text(text, source).await;
    let framework_result = framework.ingest_text(text, source).await;
    IngestReport {
        source: source.to_string(),
        outcomes: vec![
            IngestOutcome::from_result(manual.kind(), manual_result),
            IngestOutcome::from_result(framework.kind(), framework_result),
        ],
    }
}
