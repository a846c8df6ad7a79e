//! Core data model: chunks, retrieval results, backend selectors, and the
//! wire shapes of the realtime chat protocol.
//!
//! Everything that crosses a subsystem boundary lives here. The Ollama wire
//! structs are private to [`crate::llm`]; this module holds the types the
//! rest of the gateway shares: the [`Chunk`] unit of retrieval, the
//! [`ChatEvent`]/[`ClientMessage`] pair spoken over the WebSocket, and the
//! small enums that select a RAG backend or vector-store mode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// RETRIEVAL DATA MODEL
// ============================================================================

/// One embedded slice of a document.
///
/// Chunks are immutable once created: ingestion mints them (with a fresh
/// UUID), an index owns them, and only a backend `reset` destroys them. Two
/// chunks may share a `source`; `id` is unique within an index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Opaque unique identifier (UUID v4 as a string).
    pub id: String,

    /// The chunk's text content.
    pub text: String,

    /// Name of the originating document. Never empty.
    pub source: String,

    /// Embedding vector; its length is fixed by the embedding model and is
    /// uniform across every chunk in one index.
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// Mint a new chunk with a fresh id.
    pub fn new(text: impl Into<String>, source: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            source: source.into(),
            embedding,
        }
    }
}

/// A chunk paired with its cosine similarity against a query vector.
/// Scores are in `[-1, 1]`; retrieval results are sorted descending.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Summary of an index's contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    /// Total number of chunks held.
    pub chunk_count: usize,

    /// Chunk count per document source, in source order.
    pub per_source: BTreeMap<String, usize>,

    /// Name of the embedding model every stored vector came from.
    pub embedding_model: String,
}

impl IndexStats {
    pub fn empty(embedding_model: impl Into<String>) -> Self {
        Self {
            chunk_count: 0,
            per_source: BTreeMap::new(),
            embedding_model: embedding_model.into(),
        }
    }

    /// Number of chunks whose source is in `filter`; `None` means all.
    pub fn matching(&self, filter: Option<&[String]>) -> usize {
        match filter {
            None => self.chunk_count,
            Some(sources) => sources
                .iter()
                .filter_map(|s| self.per_source.get(s))
                .sum(),
        }
    }
}

// ============================================================================
// BACKEND SELECTORS
// ============================================================================

/// Which RAG backend a query or ingestion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hand-rolled backend: fixed-window chunking, in-memory index with JSON
    /// persistence.
    Manual,

    /// Framework backend: recursive-separator chunking, SQLite-backed index
    /// (flat in-memory or persistent on-disk).
    Framework,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Manual => "manual",
            BackendKind::Framework => "framework",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(BackendKind::Manual),
            "framework" => Ok(BackendKind::Framework),
            _ => Err(format!("unknown backend: {s} (expected manual|framework)")),
        }
    }
}

/// Storage mode for the framework backend's vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreMode {
    /// In-memory only; state is lost on restart.
    Flat,

    /// On-disk under the configured directory; survives restart.
    Persistent,
}

impl FromStr for VectorStoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" => Ok(VectorStoreMode::Flat),
            "persistent" => Ok(VectorStoreMode::Persistent),
            _ => Err(format!(
                "unknown vectorstore mode: {s} (expected flat|persistent)"
            )),
        }
    }
}

// ============================================================================
// GENERATION OPTIONS
// ============================================================================

/// Sampling options forwarded verbatim to the Ollama `options` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Maximum number of tokens to generate (`num_predict` on the wire).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stop: Vec<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(0.9),
            top_k: Some(40),
            num_predict: None,
            stop: Vec::new(),
        }
    }
}

impl GenerateOptions {
    /// Low-temperature variant used by the agent loop, where determinism
    /// matters more than flair.
    pub fn deterministic() -> Self {
        Self {
            temperature: Some(0.1),
            top_p: Some(0.9),
            top_k: Some(20),
            num_predict: None,
            stop: Vec::new(),
        }
    }
}

// ============================================================================
// REALTIME CHAT PROTOCOL
// ============================================================================

/// Server-to-client event on the chat socket.
///
/// Serializes as `{"type": "...", "message": "..."}`. Within one turn the
/// `user` echo precedes `typing`, which precedes the `ai` deltas; a failed
/// turn ends with a single `error` instead, and the session stays open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "message", rename_all = "lowercase")]
pub enum ChatEvent {
    /// Operational notice (connected, model loaded, file indexed).
    System(String),

    /// Echo of the user's own message, for UI rendering.
    User(String),

    /// "Assistant is generating" indicator; idempotent in the UI.
    Typing(String),

    /// Assistant output; emitted as one event per streamed delta.
    Ai(String),

    /// Recoverable per-turn failure.
    Error(String),
}

impl ChatEvent {
    /// The event's wire tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::System(_) => "system",
            ChatEvent::User(_) => "user",
            ChatEvent::Typing(_) => "typing",
            ChatEvent::Ai(_) => "ai",
            ChatEvent::Error(_) => "error",
        }
    }

    /// The event's payload text.
    pub fn text(&self) -> &str {
        match self {
            ChatEvent::System(m)
            | ChatEvent::User(m)
            | ChatEvent::Typing(m)
            | ChatEvent::Ai(m)
            | ChatEvent::Error(m) => m,
        }
    }
}

/// Client-to-server message on the chat socket.
///
/// `sources` restricts retrieval to the named documents; absent means no RAG
/// filter. `useLangchain` (kept under its historical wire name) switches the
/// session to the framework backend; absent means "keep the session's
/// current selector".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,

    #[serde(rename = "useLangchain", skip_serializing_if = "Option::is_none")]
    pub use_framework: Option<bool>,
}
