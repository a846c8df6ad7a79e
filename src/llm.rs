//! HTTP client for the Ollama runtime: generation, embeddings, model admin.
//!
//! The runtime is a plain HTTP service. Generation posts to
//! `{base}/api/generate` (optionally streamed as NDJSON), embeddings to
//! `{base}/api/embeddings`; the model catalog lives at `{base}/api/tags` and
//! models are fetched with `{base}/api/pull`.
//!
//! The client performs **no retries**. Transient failures surface to the
//! caller (the orchestrator turns them into a single `error` event on the
//! session; the admin surface turns them into 5xx responses). Every request
//! is bounded by the configured per-request timeout, including the streamed
//! body of a generation; a turn cannot outlive its deadline.

use crate::types::GenerateOptions;
use crate::utils::{RecordStream, parse_ndjson_stream};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// Stream of generated text deltas; finite and non-restartable. Dropping it
/// cancels the underlying HTTP request.
pub type DeltaStream = Pin<Box<dyn futures::Stream<Item = Result<String>> + Send>>;

/// The narrow LLM surface the rest of the gateway depends on.
///
/// The orchestrator, agent loop, and RAG backends all take an
/// `Arc<dyn LlmProvider>` so tests can substitute scripted providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a full completion for `prompt` and return the aggregated text.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String>;

    /// Generate a completion as a lazy stream of text deltas.
    async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<DeltaStream>;

    /// Embed `text` and return the model's vector. The dimension is whatever
    /// the model produces; callers are responsible for storing it uniformly.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>>;
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a GenerateOptions,
}

/// One record of a generate response. With `stream=false` the whole reply is
/// a single record; with `stream=true` each NDJSON line is one.
#[derive(Debug, Deserialize)]
pub(crate) struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: String,
}

// ============================================================================
// CLIENT
// ============================================================================

/// HTTP wrapper around a single Ollama runtime.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Build a client for `base_url` with a per-request deadline and a
    /// bounded connection pool.
    pub fn new(base_url: impl Into<String>, timeout_secs: u64, pool_size: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(pool_size)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_checked(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(crate::error::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Error::protocol(format!("{path} returned {status}: {body}")));
        }
        Ok(response)
    }

    /// List the models the runtime has available locally (`/api/tags`).
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(crate::error::from_reqwest)?;

        if !response.status().is_success() {
            return Err(Error::protocol(format!(
                "/api/tags returned {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response.json().await.map_err(crate::error::from_reqwest)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Ask the runtime to pull `model` (`/api/pull`, non-streaming). Returns
    /// the runtime's final status string.
    pub async fn pull_model(&self, model: &str) -> Result<String> {
        let request = PullRequest {
            name: model,
            stream: false,
        };
        let response = self.post_checked("/api/pull", &request).await?;
        let pull: PullResponse = response.json().await.map_err(crate::error::from_reqwest)?;
        Ok(pull.status)
    }
}

#[async_trait]
impl LlmProvider for OllamaClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options,
        };
        let response = self.post_checked("/api/generate", &request).await?;
        let chunk: GenerateChunk = response.json().await.map_err(crate::error::from_reqwest)?;

        if !chunk.done {
            return Err(Error::protocol(
                "non-streaming generate answered with done=false",
            ));
        }
        Ok(chunk.response)
    }

    async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<DeltaStream> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: true,
            options,
        };
        let response = self.post_checked("/api/generate", &request).await?;
        Ok(deltas_from_records(parse_ndjson_stream(response)))
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingsRequest {
            model,
            prompt: text,
        };
        let response = self.post_checked("/api/embeddings", &request).await?;
        let parsed: EmbeddingsResponse =
            response.json().await.map_err(crate::error::from_reqwest)?;

        if parsed.embedding.is_empty() {
            return Err(Error::protocol("embeddings response carried no vector"));
        }
        Ok(parsed.embedding)
    }
}

/// Map a stream of [`GenerateChunk`] records into text deltas, terminating at
/// the first `done: true` record. A transport or protocol error is surfaced
/// once and then the stream ends.
pub(crate) fn deltas_from_records(records: RecordStream<GenerateChunk>) -> DeltaStream {
    let deltas = records
        .scan(false, |finished, item| {
            if *finished {
                return futures::future::ready(None);
            }
            let out = match item {
                Ok(chunk) => {
                    if chunk.done {
                        *finished = true;
                    }
                    if chunk.response.is_empty() {
                        None
                    } else {
                        Some(Ok(chunk.response))
                    }
                }
                Err(e) => {
                    *finished = true;
                    Some(Err(e))
                }
            };
            futures::future::ready(Some(out))
        })
        .filter_map(futures::future::ready);

    Box::pin(deltas)
}
