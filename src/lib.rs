//! # raggate
//!
//! A document-aware chat gateway for locally hosted Ollama runtimes.
//!
//! Browser clients hold a persistent WebSocket session (`/ws`) and exchange
//! JSON events; each user message is routed through a query orchestrator
//! that optionally augments the prompt with passages retrieved from
//! user-uploaded documents (RAG) before streaming the model's reply back.
//! A small ReAct agent exposed over HTTP can invoke registered tools
//! (calculator, clock, mock lookups) instead of answering directly.
//!
//! ## Architecture
//!
//! - **llm**: HTTP client for the Ollama runtime: generation (aggregate and
//!   NDJSON-streamed), embeddings, and model admin, behind the
//!   [`LlmProvider`] seam.
//! - **document / chunker**: plain-text extraction from uploads and the two
//!   splitting strategies (fixed windows, recursive separators).
//! - **index**: the vector-store contract with two variants: in-memory with
//!   JSON persistence, and SQLite-backed (flat or persistent on disk).
//! - **rag**: the two interchangeable backends (`manual` and `framework`),
//!   context assembly under a character budget, and unified ingestion into
//!   both.
//! - **orchestrator**: plain-vs-augmented prompt routing and the streamed
//!   LLM call, one turn at a time.
//! - **tools / calc / agent**: the tool registry, the whitelisted
//!   arithmetic evaluator behind the calculator tool, and the ReAct loop.
//! - **session**: the WebSocket protocol: `system` / `user` / `typing` /
//!   `ai` / `error` events, strict per-session ordering, disconnect
//!   cancellation.
//! - **server / config**: shared state, the admin HTTP surface, and the
//!   env > YAML > defaults configuration stack.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use raggate::{Settings, server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let addr = settings.bind_addr();
//!     let state = server::AppState::initialize(settings)?;
//!     let listener = tokio::net::TcpListener::bind(&addr).await?;
//!     axum::serve(listener, server::router(state)).await?;
//!     Ok(())
//! }
//! ```

/// ReAct agent loop: step parsing, trace recording, and the step budget.
pub mod agent;

/// Whitelisted arithmetic expression evaluator (the calculator tool's
/// security boundary).
pub mod calc;

/// Fixed-window and recursive-separator text chunking.
pub mod chunker;

/// Layered configuration: compiled defaults, YAML file, environment.
pub mod config;

/// Plain-text extraction from PDF / DOCX / TXT / MD uploads.
pub mod document;

/// Error taxonomy and the crate-wide `Result` alias.
pub mod error;

/// Vector index contract and its two variants.
pub mod index;

/// Ollama HTTP client and the `LlmProvider` seam.
pub mod llm;

/// Prompt routing and streamed generation for chat turns.
pub mod orchestrator;

/// RAG backends, context assembly, and unified ingestion.
pub mod rag;

/// WebSocket session layer.
pub mod session;

/// Application state, router, and admin endpoints.
pub mod server;

/// Tool definitions, the registry, and the built-in tool set.
pub mod tools;

/// Shared data model and wire shapes.
pub mod types;

/// Streaming NDJSON parsing and atomic file writes.
pub mod utils;

// --- Core re-exports ---

pub use agent::{Agent, AgentOutcome, TraceStep};
pub use chunker::Chunker;
pub use config::Settings;
pub use error::{Error, Result};
pub use index::{MemoryIndex, SqliteIndex, VectorIndex};
pub use llm::{DeltaStream, LlmProvider, OllamaClient};
pub use orchestrator::{Orchestrator, SessionQuery};
pub use rag::{BackendStats, IngestReport, RagBackend, RagSettings, assemble_context};
pub use tools::{Tool, ToolRegistry};
pub use types::{
    BackendKind, ChatEvent, Chunk, ClientMessage, GenerateOptions, IndexStats, ScoredChunk,
    VectorStoreMode,
};
