//! Query orchestrator: picks the plain or RAG prompt shape, invokes the LLM,
//! and hands the delta stream back to the session layer.
//!
//! This is the only place that decides between prompt shapes and the only
//! place that enforces the context budget (via the backend's
//! `build_context`). It never retries and never falls back silently: a
//! retrieval failure aborts the turn so the session can emit a single
//! `error` event.

use crate::llm::{DeltaStream, LlmProvider};
use crate::rag::RagBackend;
use crate::types::{BackendKind, GenerateOptions, ScoredChunk};
use crate::Result;
use std::sync::Arc;

/// System preamble for every chat prompt.
const SYSTEM_PREAMBLE: &str = "You are a helpful assistant.";

/// Extra instruction when retrieved context is attached.
const RAG_INSTRUCTION: &str = "Use the following context to answer the user's question. \
     If the answer is not in the context, say you don't know.";

/// Per-message routing input, resolved by the session layer.
#[derive(Debug, Clone)]
pub struct SessionQuery {
    pub backend: BackendKind,
    pub sources: Option<Vec<String>>,
}

/// What a turn resolved to, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptShape {
    Plain,
    Augmented,
}

/// Routes each message to a backend, builds the prompt, and streams the
/// model's answer.
pub struct Orchestrator {
    manual: Arc<RagBackend>,
    framework: Arc<RagBackend>,
    llm: Arc<dyn LlmProvider>,
    rag_enabled: bool,
    options: GenerateOptions,
}

impl Orchestrator {
    pub fn new(
        manual: Arc<RagBackend>,
        framework: Arc<RagBackend>,
        llm: Arc<dyn LlmProvider>,
        rag_enabled: bool,
    ) -> Self {
        Self {
            manual,
            framework,
            llm,
            rag_enabled,
            options: GenerateOptions::default(),
        }
    }

    pub fn backend(&self, kind: BackendKind) -> &Arc<RagBackend> {
        match kind {
            BackendKind::Manual => &self.manual,
            BackendKind::Framework => &self.framework,
        }
    }

    /// Answer one user message as a stream of text deltas.
    ///
    /// RAG applies only when it is globally enabled, the session attached a
    /// non-empty source filter, and the selected backend actually holds
    /// chunks for those sources; otherwise the prompt is plain. A retrieval
    /// failure aborts the turn (no silent downgrade to a plain prompt).
    pub async fn answer(
        &self,
        model: &str,
        user_message: &str,
        query: &SessionQuery,
    ) -> Result<DeltaStream> {
        let (prompt, shape) = self.build_prompt(user_message, query).await?;
        log::debug!(
            "answering via {} with a {:?} prompt ({} chars)",
            query.backend,
            shape,
            prompt.chars().count()
        );
        self.llm.generate_stream(model, &prompt, &self.options).await
    }

    /// Resolve the prompt for one message. Exposed for the preview endpoint
    /// and tests.
    pub async fn build_prompt(
        &self,
        user_message: &str,
        query: &SessionQuery,
    ) -> Result<(String, PromptShape)> {
        let filter = query
            .sources
            .as_deref()
            .filter(|sources| !sources.is_empty());

        let Some(filter) = filter else {
            return Ok((plain_prompt(user_message), PromptShape::Plain));
        };
        if !self.rag_enabled {
            return Ok((plain_prompt(user_message), PromptShape::Plain));
        }

        let backend = self.backend(query.backend);
        if backend.matching_chunks(Some(filter))? == 0 {
            // The filter names sources with no chunks; treat this turn as
            // RAG-disabled rather than sending an empty context.
            return Ok((plain_prompt(user_message), PromptShape::Plain));
        }

        let (context, _retrieved) = backend
            .build_context(user_message, backend.default_top_k(), Some(filter))
            .await?;
        Ok((augmented_prompt(&context, user_message), PromptShape::Augmented))
    }

    /// Retrieval-only view of a query against one backend (admin preview).
    pub async fn preview(
        &self,
        kind: BackendKind,
        query: &str,
        top_k: usize,
        sources: Option<&[String]>,
    ) -> Result<(String, Vec<ScoredChunk>)> {
        let backend = self.backend(kind);
        backend.build_context(query, top_k, sources).await
    }
}

fn plain_prompt(user_message: &str) -> String {
    format!("{SYSTEM_PREAMBLE}\nUser: {user_message}\nAssistant:")
}

fn augmented_prompt(context: &str, user_message: &str) -> String {
    format!(
        "{SYSTEM_PREAMBLE} {RAG_INSTRUCTION}\n\nContext:\n{context}\n\nUser: {user_message}\nAssistant:"
    )
}
