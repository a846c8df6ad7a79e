//! Restart round-trips: both backends must come back with identical stats
//! after their process-lifetime state is dropped and rebuilt from disk.

mod common;

use common::ScriptedProvider;
use raggate::rag::{RagBackend, RagSettings};
use raggate::types::VectorStoreMode;

fn settings() -> RagSettings {
    RagSettings {
        embedding_model: "nomic-embed-text".to_string(),
        chunk_size: 800,
        chunk_overlap: 200,
        top_k: 3,
        max_context_chars: 4000,
        upload_dir: None,
    }
}

#[tokio::test]
async fn manual_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let index_file = dir.path().join("manual_index.json");

    {
        let backend =
            RagBackend::manual(settings(), ScriptedProvider::shared(), Some(index_file.clone()))
                .unwrap();
        backend
            .ingest_text("The cat's name is Mittens.", "cats.txt")
            .await
            .unwrap();
        backend
            .ingest_text("The dog's name is Rex.", "dogs.txt")
            .await
            .unwrap();
    }

    // "Restart": a fresh backend over the same file.
    let backend =
        RagBackend::manual(settings(), ScriptedProvider::shared(), Some(index_file)).unwrap();
    let stats = backend.stats().unwrap();
    assert_eq!(stats.index.chunk_count, 2);
    assert_eq!(stats.index.per_source["cats.txt"], 1);
    assert_eq!(stats.index.per_source["dogs.txt"], 1);

    // Retrieval works against the reloaded vectors.
    let filter = vec!["cats.txt".to_string()];
    let (context, _) = backend
        .build_context("what is the cat called?", 3, Some(&filter))
        .await
        .unwrap();
    assert!(context.contains("Mittens"));
}

#[tokio::test]
async fn framework_persistent_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("framework");

    {
        let backend = RagBackend::framework(
            settings(),
            ScriptedProvider::shared(),
            VectorStoreMode::Persistent,
            &store_dir,
        )
        .unwrap();
        backend
            .ingest_text("The secret code is BANANA-7.", "secret.txt")
            .await
            .unwrap();
    }

    let backend = RagBackend::framework(
        settings(),
        ScriptedProvider::shared(),
        VectorStoreMode::Persistent,
        &store_dir,
    )
    .unwrap();
    let stats = backend.stats().unwrap();
    assert_eq!(stats.index.chunk_count, 1);
    assert_eq!(stats.index.per_source["secret.txt"], 1);

    let (context, retrieved) = backend
        .build_context("what is the secret code?", 3, None)
        .await
        .unwrap();
    assert!(context.contains("BANANA-7"));
    assert_eq!(retrieved.len(), 1);
}

#[tokio::test]
async fn framework_flat_backend_does_not_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("framework");

    {
        let backend = RagBackend::framework(
            settings(),
            ScriptedProvider::shared(),
            VectorStoreMode::Flat,
            &store_dir,
        )
        .unwrap();
        backend
            .ingest_text("The secret code is BANANA-7.", "secret.txt")
            .await
            .unwrap();
        assert_eq!(backend.stats().unwrap().index.chunk_count, 1);
    }

    let backend = RagBackend::framework(
        settings(),
        ScriptedProvider::shared(),
        VectorStoreMode::Flat,
        &store_dir,
    )
    .unwrap();
    assert_eq!(backend.stats().unwrap().index.chunk_count, 0);
}

#[tokio::test]
async fn reset_then_restart_stays_empty() {
    let dir = tempfile::tempdir().unwrap();
    let index_file = dir.path().join("manual_index.json");

    {
        let backend =
            RagBackend::manual(settings(), ScriptedProvider::shared(), Some(index_file.clone()))
                .unwrap();
        backend
            .ingest_text("The cat's name is Mittens.", "cats.txt")
            .await
            .unwrap();
        backend.reset().unwrap();
    }

    let backend =
        RagBackend::manual(settings(), ScriptedProvider::shared(), Some(index_file)).unwrap();
    assert_eq!(backend.stats().unwrap().index.chunk_count, 0);
}

#[tokio::test]
async fn ingest_count_matches_stats_delta() {
    let dir = tempfile::tempdir().unwrap();
    let backend = RagBackend::manual(
        settings(),
        ScriptedProvider::shared(),
        Some(dir.path().join("manual_index.json")),
    )
    .unwrap();

    // Long text spanning several fixed windows.
    let long_text = "The cat sat on the mat. ".repeat(100);
    let before = backend.stats().unwrap().index.chunk_count;
    let added = backend.ingest_text(&long_text, "cats.txt").await.unwrap();
    let after = backend.stats().unwrap().index.chunk_count;

    assert!(added > 1);
    assert_eq!(after - before, added);
}
