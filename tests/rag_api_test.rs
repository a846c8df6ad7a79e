//! Admin HTTP surface: health, model catalog, backend selection, ingestion,
//! stats, and retrieval previews against a mock LLM runtime.

mod common;

use common::{spawn_gateway, spawn_mock_ollama, test_settings};
use serde_json::{Value, json};

async fn start() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let llm = spawn_mock_ollama().await;
    let addr = spawn_gateway(test_settings(&llm, dir.path())).await;
    (addr, dir)
}

#[tokio::test]
async fn health_reports_models_and_counts() {
    let (addr, _dir) = start().await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["generation_model"], "llama3.2");
    assert_eq!(body["embedding_model"], "nomic-embed-text");
    assert_eq!(body["chunks"]["manual"], 0);
    assert_eq!(body["chunks"]["framework"], 0);
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn model_catalog_merges_live_tags() {
    let (addr, _dir) = start().await;
    let body: Value = reqwest::get(format!("http://{addr}/api/models"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let models = body["models"].as_array().unwrap();
    let llama = models
        .iter()
        .find(|m| m["name"] == "llama3.2")
        .expect("catalog model present");
    assert_eq!(llama["available"], true);

    let mistral = models.iter().find(|m| m["name"] == "mistral").unwrap();
    assert_eq!(mistral["available"], false);
    assert_eq!(body["current"], "llama3.2");
}

#[tokio::test]
async fn model_switch_updates_current() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("http://{addr}/api/models/load"))
        .json(&json!({ "model": "qwen2.5" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["generation_model"], "qwen2.5");
}

#[tokio::test]
async fn backend_selector_round_trip() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    let current: Value = reqwest::get(format!("http://{addr}/api/system/current"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["backend"], "manual");

    let switched: Value = client
        .post(format!("http://{addr}/api/system/switch"))
        .json(&json!({ "backend": "framework" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(switched["backend"], "framework");

    let current: Value = reqwest::get(format!("http://{addr}/api/system/current"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["backend"], "framework");
}

#[tokio::test]
async fn backend_selector_rejects_unknown() {
    let (addr, _dir) = start().await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/system/switch"))
        .json(&json!({ "backend": "chroma" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn unified_ingestion_writes_both_backends() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    let report: Value = client
        .post(format!("http://{addr}/api/rag/ingest_text"))
        .json(&json!({ "text": "The secret code is BANANA-7.", "source": "secret.txt" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let outcomes = report["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    for outcome in outcomes {
        assert!(outcome["chunks_added"].as_u64().unwrap() >= 1);
        assert!(outcome.get("error").is_none() || outcome["error"].is_null());
    }

    let stats: Value = reqwest::get(format!("http://{addr}/api/rag/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["manual"]["index"]["per_source"]["secret.txt"], 1);
    assert_eq!(stats["framework"]["index"]["per_source"]["secret.txt"], 1);
}

#[tokio::test]
async fn per_backend_ingestion_and_stats() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    let added: Value = client
        .post(format!("http://{addr}/api/rag/manual/ingest_text"))
        .json(&json!({ "text": "The cat's name is Mittens.", "source": "cats.txt" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(added["backend"], "manual");
    assert_eq!(added["chunks_added"], 1);

    let manual: Value = reqwest::get(format!("http://{addr}/api/rag/manual/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(manual["index"]["chunk_count"], 1);

    // The framework backend was not touched.
    let framework: Value = reqwest::get(format!("http://{addr}/api/rag/framework/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(framework["index"]["chunk_count"], 0);
}

#[tokio::test]
async fn file_ingestion_parses_text_upload() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!(
            "http://{addr}/api/rag/manual/ingest_file?filename=notes.txt"
        ))
        .body("The dog's name is Rex.".as_bytes().to_vec())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["chunks_added"], 1);

    let stats: Value = reqwest::get(format!("http://{addr}/api/rag/manual/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["index"]["per_source"]["notes.txt"], 1);
}

#[tokio::test]
async fn unsupported_upload_is_client_error() {
    let (addr, _dir) = start().await;
    let response = reqwest::Client::new()
        .post(format!(
            "http://{addr}/api/rag/manual/ingest_file?filename=sheet.xlsx"
        ))
        .body(vec![0u8, 1, 2])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn preview_returns_scored_chunks_without_generation() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{addr}/api/rag/framework/ingest_text"))
        .json(&json!({ "text": "The cat's name is Mittens.", "source": "cats.txt" }))
        .send()
        .await
        .unwrap();
    client
        .post(format!("http://{addr}/api/rag/framework/ingest_text"))
        .json(&json!({ "text": "The dog's name is Rex.", "source": "dogs.txt" }))
        .send()
        .await
        .unwrap();

    let preview: Value = client
        .post(format!("http://{addr}/api/rag/framework/preview"))
        .json(&json!({ "query": "what is the cat called?", "sources": ["cats.txt"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let results = preview["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["source"], "cats.txt");
    assert!(results[0]["score"].as_f64().unwrap() > 0.0);
    assert!(preview["context"].as_str().unwrap().contains("Mittens"));
}

#[tokio::test]
async fn backend_reset_clears_only_that_backend() {
    let (addr, _dir) = start().await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{addr}/api/rag/ingest_text"))
        .json(&json!({ "text": "The cat's name is Mittens.", "source": "cats.txt" }))
        .send()
        .await
        .unwrap();

    client
        .post(format!("http://{addr}/api/rag/manual/reset"))
        .send()
        .await
        .unwrap();

    let stats: Value = reqwest::get(format!("http://{addr}/api/rag/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["manual"]["index"]["chunk_count"], 0);
    assert_eq!(stats["framework"]["index"]["chunk_count"], 1);
}
