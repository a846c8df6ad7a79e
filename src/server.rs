//! HTTP server: shared application state, the router, and the admin surface.
//!
//! Everything long-lived is constructed once in [`AppState::initialize`] and
//! shared by reference: the Ollama client, both RAG backends (the only
//! mutable state, synchronized inside their indices), the orchestrator, and
//! the single `agent1` instance (serialized behind an async mutex). The
//! WebSocket chat endpoint and the admin endpoints hang off one router.

use crate::agent::Agent;
use crate::config::Settings;
use crate::llm::{LlmProvider, OllamaClient};
use crate::orchestrator::Orchestrator;
use crate::rag::{self, RagBackend};
use crate::session;
use crate::tools::ToolRegistry;
use crate::types::BackendKind;
use crate::{Error, Result};
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Models offered in the admin catalog even before the runtime reports them.
const MODEL_CATALOG: [&str; 6] = [
    "llama3.2",
    "llama3.1",
    "qwen2.5",
    "mistral",
    "phi3",
    "gemma2",
];

/// Process-wide shared state.
pub struct AppState {
    pub settings: Settings,
    pub llm: Arc<OllamaClient>,
    pub orchestrator: Orchestrator,
    pub agent: Mutex<Agent>,
    pub current_model: RwLock<String>,
    pub default_backend: RwLock<BackendKind>,
    sessions: std::sync::Mutex<HashSet<Uuid>>,
}

impl AppState {
    /// Build every long-lived component from validated settings. Fails fast
    /// on anything that would leave the gateway unable to serve.
    pub fn initialize(settings: Settings) -> Result<Arc<Self>> {
        let llm = Arc::new(OllamaClient::new(
            settings.llm_base_url.clone(),
            settings.llm_timeout_seconds,
            settings.llm_pool_size,
        )?);
        let provider: Arc<dyn LlmProvider> = llm.clone();

        let manual = Arc::new(RagBackend::manual(
            settings.rag_settings(),
            provider.clone(),
            Some(settings.manual_index_file()),
        )?);
        let framework = Arc::new(RagBackend::framework(
            settings.rag_settings(),
            provider.clone(),
            settings.rag_vectorstore,
            &settings.framework_store_dir(),
        )?);

        let orchestrator = Orchestrator::new(
            manual,
            framework,
            provider.clone(),
            settings.rag_enabled,
        );

        let registry = Arc::new(ToolRegistry::builtin());
        let agent = Agent::new(
            provider,
            registry,
            settings.llm_generation_model.clone(),
            settings.agent_max_steps,
        );

        Ok(Arc::new(Self {
            current_model: RwLock::new(settings.llm_generation_model.clone()),
            default_backend: RwLock::new(settings.rag_backend_default),
            llm,
            orchestrator,
            agent: Mutex::new(agent),
            sessions: std::sync::Mutex::new(HashSet::new()),
            settings,
        }))
    }

    pub fn register_session(&self, id: Uuid) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id);
        }
    }

    pub fn deregister_session(&self, id: Uuid) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Build the full router: WebSocket chat plus the admin surface.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/models", get(list_models))
        .route("/api/models/load", post(load_model))
        .route("/api/system/current", get(current_backend))
        .route("/api/system/switch", post(switch_backend))
        .route("/api/rag/stats", get(rag_stats))
        .route("/api/rag/ingest_file", post(unified_ingest_file))
        .route("/api/rag/ingest_text", post(unified_ingest_text))
        .route("/api/rag/:backend/stats", get(backend_stats))
        .route("/api/rag/:backend/ingest_file", post(backend_ingest_file))
        .route("/api/rag/:backend/ingest_text", post(backend_ingest_text))
        .route("/api/rag/:backend/preview", post(backend_preview))
        .route("/api/rag/:backend/reset", post(backend_reset))
        .route("/api/agents/agent1/info", get(agent_info))
        .route("/api/agents/agent1/tools", get(agent_tools))
        .route("/api/agents/agent1/query", post(agent_query))
        .route("/api/agents/agent1/reset", post(agent_reset))
        .with_state(state)
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Wrapper turning crate errors into JSON error responses: ingestion
/// rejections are the caller's fault (400), LLM failures are upstream
/// faults (502), the rest is 500.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_ingest_rejection() => StatusCode::BAD_REQUEST,
            Error::Http(_) | Error::Timeout | Error::Protocol(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn parse_backend(raw: &str) -> ApiResult<BackendKind> {
    BackendKind::from_str(raw).map_err(|e| ApiError(Error::config(e)))
}

// ============================================================================
// CHAT
// ============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| session::handle_socket(socket, state))
}

// ============================================================================
// HEALTH & MODELS
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let manual_stats = state.orchestrator.backend(BackendKind::Manual).stats()?;
    let framework_stats = state.orchestrator.backend(BackendKind::Framework).stats()?;
    Ok(Json(json!({
        "status": "ok",
        "generation_model": *state.current_model.read().await,
        "embedding_model": state.settings.llm_embedding_model,
        "rag_enabled": state.settings.rag_enabled,
        "backend_default": *state.default_backend.read().await,
        "active_sessions": state.session_count(),
        "chunks": {
            "manual": manual_stats.index.chunk_count,
            "framework": framework_stats.index.chunk_count,
        },
    })))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let (live, warning) = match state.llm.list_models().await {
        Ok(models) => (models, None),
        Err(e) => {
            log::warn!("model catalog probe failed: {e}");
            (Vec::new(), Some(e.to_string()))
        }
    };

    let mut names: Vec<String> = MODEL_CATALOG.iter().map(|m| m.to_string()).collect();
    for model in &live {
        if !names.contains(model) {
            names.push(model.clone());
        }
    }

    let models: Vec<Value> = names
        .iter()
        .map(|name| {
            let available = live
                .iter()
                .any(|m| m == name || m.starts_with(&format!("{name}:")));
            json!({ "name": name, "available": available })
        })
        .collect();

    Json(json!({
        "models": models,
        "current": *state.current_model.read().await,
        "warning": warning,
    }))
}

#[derive(Deserialize)]
struct LoadModelBody {
    model: String,
}

async fn load_model(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoadModelBody>,
) -> ApiResult<Json<Value>> {
    let model = body.model.trim().to_string();
    if model.is_empty() {
        return Err(ApiError(Error::config("model name must not be empty")));
    }

    let status = state.llm.pull_model(&model).await?;
    *state.current_model.write().await = model.clone();
    log::info!("switched generation model to {model}");
    Ok(Json(json!({ "success": true, "model": model, "status": status })))
}

// ============================================================================
// BACKEND SELECTOR
// ============================================================================

async fn current_backend(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "backend": *state.default_backend.read().await }))
}

#[derive(Deserialize)]
struct SwitchBackendBody {
    backend: String,
}

async fn switch_backend(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SwitchBackendBody>,
) -> ApiResult<Json<Value>> {
    let backend = parse_backend(&body.backend)?;
    *state.default_backend.write().await = backend;
    log::info!("default RAG backend switched to {backend}");
    Ok(Json(json!({ "success": true, "backend": backend })))
}

// ============================================================================
// RAG ADMIN
// ============================================================================

async fn rag_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let manual = state.orchestrator.backend(BackendKind::Manual).stats()?;
    let framework = state.orchestrator.backend(BackendKind::Framework).stats()?;
    Ok(Json(json!({ "manual": manual, "framework": framework })))
}

async fn backend_stats(
    State(state): State<Arc<AppState>>,
    Path(backend): Path<String>,
) -> ApiResult<Json<Value>> {
    let kind = parse_backend(&backend)?;
    let stats = state.orchestrator.backend(kind).stats()?;
    Ok(Json(serde_json::to_value(stats).map_err(Error::from)?))
}

#[derive(Deserialize)]
struct IngestTextBody {
    text: String,
    source: String,
}

#[derive(Deserialize)]
struct IngestFileParams {
    filename: String,
}

async fn unified_ingest_text(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestTextBody>,
) -> Json<rag::IngestReport> {
    let report = rag::ingest_text_both(
        state.orchestrator.backend(BackendKind::Manual),
        state.orchestrator.backend(BackendKind::Framework),
        &body.text,
        &body.source,
    )
    .await;
    Json(report)
}

async fn unified_ingest_file(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IngestFileParams>,
    bytes: Bytes,
) -> Json<rag::IngestReport> {
    let report = rag::ingest_file_both(
        state.orchestrator.backend(BackendKind::Manual),
        state.orchestrator.backend(BackendKind::Framework),
        &params.filename,
        &bytes,
    )
    .await;
    Json(report)
}

async fn backend_ingest_text(
    State(state): State<Arc<AppState>>,
    Path(backend): Path<String>,
    Json(body): Json<IngestTextBody>,
) -> ApiResult<Json<Value>> {
    let kind = parse_backend(&backend)?;
    let added = state
        .orchestrator
        .backend(kind)
        .ingest_text(&body.text, &body.source)
        .await?;
    Ok(Json(json!({ "backend": kind, "chunks_added": added })))
}

async fn backend_ingest_file(
    State(state): State<Arc<AppState>>,
    Path(backend): Path<String>,
    Query(params): Query<IngestFileParams>,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let kind = parse_backend(&backend)?;
    let added = state
        .orchestrator
        .backend(kind)
        .ingest_file(&params.filename, &bytes)
        .await?;
    Ok(Json(json!({ "backend": kind, "chunks_added": added })))
}

#[derive(Deserialize)]
struct PreviewBody {
    query: String,
    top_k: Option<usize>,
    sources: Option<Vec<String>>,
}

async fn backend_preview(
    State(state): State<Arc<AppState>>,
    Path(backend): Path<String>,
    Json(body): Json<PreviewBody>,
) -> ApiResult<Json<Value>> {
    let kind = parse_backend(&backend)?;
    let top_k = body
        .top_k
        .unwrap_or_else(|| state.orchestrator.backend(kind).default_top_k());
    let (context, retrieved) = state
        .orchestrator
        .preview(kind, &body.query, top_k, body.sources.as_deref())
        .await?;

    let results: Vec<Value> = retrieved
        .iter()
        .map(|r| {
            json!({
                "id": r.chunk.id,
                "source": r.chunk.source,
                "score": r.score,
                "text": r.chunk.text,
            })
        })
        .collect();
    Ok(Json(json!({ "backend": kind, "context": context, "results": results })))
}

async fn backend_reset(
    State(state): State<Arc<AppState>>,
    Path(backend): Path<String>,
) -> ApiResult<Json<Value>> {
    let kind = parse_backend(&backend)?;
    state.orchestrator.backend(kind).reset()?;
    log::info!("{kind} backend reset");
    Ok(Json(json!({ "success": true, "backend": kind })))
}

// ============================================================================
// AGENT
// ============================================================================

async fn agent_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    let agent = state.agent.lock().await;
    Json(json!({
        "name": "agent1",
        "model": agent.model(),
        "max_steps": agent.max_steps(),
        "history_turns": agent.history_len(),
        "tools": agent.registry().names(),
    }))
}

async fn agent_tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    let agent = state.agent.lock().await;
    Json(json!({ "tools": agent.registry().descriptors() }))
}

#[derive(Deserialize)]
struct AgentQueryBody {
    message: String,
}

async fn agent_query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AgentQueryBody>,
) -> Json<Value> {
    // One agent instance, serialized: concurrent queries queue here.
    let mut agent = state.agent.lock().await;
    match agent.run(&body.message).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "final_answer": outcome.final_answer,
            "trace": outcome.trace,
            "tools_used": outcome.tools_used,
            "iterations": outcome.iterations,
            "capped": outcome.capped,
        })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

async fn agent_reset(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut agent = state.agent.lock().await;
    agent.reset();
    Json(json!({ "success": true }))
}
