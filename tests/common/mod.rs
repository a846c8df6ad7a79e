//! Shared test harness: an in-process mock of the Ollama HTTP API, a
//! gateway spawner, and a scripted in-process provider.
#![allow(dead_code)]

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use raggate::llm::{DeltaStream, LlmProvider};
use raggate::types::GenerateOptions;
use raggate::{Result, Settings, VectorStoreMode};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

/// Deterministic mock embedding: a handful of keyword axes so retrieval
/// ranking (and source filtering) is observable in tests.
pub fn mock_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v = vec![0.05f32; 5];
    let mut hit = false;
    if lower.contains("secret") || lower.contains("banana") {
        v[0] = 1.0;
        hit = true;
    }
    if lower.contains("cat") || lower.contains("mittens") {
        v[1] = 1.0;
        hit = true;
    }
    if lower.contains("dog") || lower.contains("rex") {
        v[2] = 1.0;
        hit = true;
    }
    if lower.contains("pet") {
        v[3] = 1.0;
        hit = true;
    }
    if !hit {
        v[4] = 1.0;
    }
    v
}

/// Scripted model behavior for both chat and agent prompts. Chat prompts
/// are answered from keywords in the (possibly context-augmented) prompt;
/// agent prompts (recognizable by the format instructions) walk a
/// calculator tool call to a final answer.
pub fn scripted_answer(prompt: &str) -> String {
    if prompt.contains("ACTION_INPUT:") {
        // Agent reasoning prompt.
        if prompt.contains("loop please") {
            return "THOUGHT: around we go\nACTION: get_current_time\nACTION_INPUT: {}".to_string();
        }
        if prompt.contains("25 * 8") {
            if prompt.contains("Observation: 200") {
                return "FINAL_ANSWER: 25 * 8 = 200".to_string();
            }
            return "THOUGHT: I need to multiply two numbers.\nACTION: calculator\nACTION_INPUT: {\"expression\": \"25 * 8\"}"
                .to_string();
        }
        return "FINAL_ANSWER: done".to_string();
    }

    if prompt.contains("2+2") {
        return "4".to_string();
    }
    if prompt.contains("BANANA-7") {
        return "The secret code is BANANA-7.".to_string();
    }
    if prompt.contains("Mittens") {
        return "The pet's name is Mittens.".to_string();
    }
    if prompt.contains("Rex") {
        return "The pet's name is Rex.".to_string();
    }
    "I don't know.".to_string()
}

#[derive(Clone)]
struct MockOllamaState {
    tags: Vec<String>,
}

/// Spawn a mock Ollama runtime on an ephemeral port; returns its base URL.
pub async fn spawn_mock_ollama() -> String {
    let state = MockOllamaState {
        tags: vec!["llama3.2:latest".to_string(), "nomic-embed-text:latest".to_string()],
    };
    let app = Router::new()
        .route("/api/generate", post(mock_generate))
        .route("/api/embeddings", post(mock_embeddings))
        .route("/api/tags", get(mock_tags))
        .route("/api/pull", post(mock_pull))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

async fn mock_generate(Json(body): Json<Value>) -> Response {
    let prompt = body["prompt"].as_str().unwrap_or("");
    let stream = body["stream"].as_bool().unwrap_or(false);
    let answer = scripted_answer(prompt);

    if stream {
        // Word-by-word NDJSON, the way the real runtime streams.
        let mut lines = String::new();
        for word in answer.split_inclusive(' ') {
            lines.push_str(&json!({ "response": word, "done": false }).to_string());
            lines.push('\n');
        }
        lines.push_str(&json!({ "response": "", "done": true }).to_string());
        lines.push('\n');
        ([(header::CONTENT_TYPE, "application/x-ndjson")], lines).into_response()
    } else {
        Json(json!({ "response": answer, "done": true })).into_response()
    }
}

async fn mock_embeddings(Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["prompt"].as_str().unwrap_or("");
    Json(json!({ "embedding": mock_embedding(prompt) }))
}

async fn mock_tags(State(state): State<MockOllamaState>) -> Json<Value> {
    let models: Vec<Value> = state.tags.iter().map(|m| json!({ "name": m })).collect();
    Json(json!({ "models": models }))
}

async fn mock_pull(Json(body): Json<Value>) -> Json<Value> {
    let name = body["name"].as_str().unwrap_or("");
    Json(json!({ "status": format!("pulled {name}") }))
}

/// Settings wired to a mock runtime, with all persistence under `data_dir`.
pub fn test_settings(llm_base_url: &str, data_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.server_host = "127.0.0.1".to_string();
    settings.llm_base_url = llm_base_url.to_string();
    settings.llm_timeout_seconds = 10;
    settings.rag_vectorstore = VectorStoreMode::Flat;
    settings.rag_vectorstore_path = data_dir.join("vectorstore");
    settings
}

/// Spawn the gateway on an ephemeral port; returns `host:port`.
pub async fn spawn_gateway(settings: Settings) -> String {
    let state = raggate::server::AppState::initialize(settings).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, raggate::server::router(state))
            .await
            .unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

/// In-process provider with the same scripted behavior as the mock runtime,
/// for tests that exercise backends directly without HTTP.
pub struct ScriptedProvider;

impl ScriptedProvider {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(
        &self,
        _model: &str,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<String> {
        Ok(scripted_answer(prompt))
    }

    async fn generate_stream(
        &self,
        _model: &str,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<DeltaStream> {
        let answer = scripted_answer(prompt);
        Ok(Box::pin(futures::stream::iter(vec![Ok(answer)])))
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>> {
        Ok(mock_embedding(text))
    }
}
