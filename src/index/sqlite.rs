//! SQLite-backed vector index (variant used by the framework RAG backend).
//!
//! Flat mode opens `:memory:` (state dies with the process); persistent mode
//! opens a database file inside the configured directory, so deleting that
//! directory resets the index. Chunk metadata lives in a `chunks` table with
//! embeddings stored as little-endian `f32` blobs; scoring loads the
//! SQL-filtered candidate set and ranks it in parallel with rayon.
//!
//! Every `add` is one committed transaction; SQLite's journal keeps a crash
//! mid-write from corrupting prior state.

use super::{VectorIndex, cosine_similarity, take_top_k, validate_batch};
use crate::types::{Chunk, IndexStats, ScoredChunk};
use crate::{Error, Result};
use rayon::prelude::*;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Bumped when the table layout changes; a mismatch rebuilds the store.
const SCHEMA_VERSION: &str = "1";

/// Database filename inside the persistent directory.
const DB_FILE: &str = "chunks.sqlite3";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    id        TEXT NOT NULL UNIQUE,
    source    TEXT NOT NULL,
    content   TEXT NOT NULL,
    embedding BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS chunks_source ON chunks(source);
";

/// SQLite-backed chunk store with exact cosine ranking.
pub struct SqliteIndex {
    embedding_model: String,
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Flat mode: an in-memory database, lost on restart.
    pub fn open_flat(embedding_model: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::finish_open(embedding_model.into(), conn, "<memory>")
    }

    /// Persistent mode: a database file inside `dir`, created on demand. An
    /// existing store built with a different embedding model or schema
    /// version is discarded with a warning.
    pub fn open_persistent(embedding_model: impl Into<String>, dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE);
        let conn = Connection::open(&path).map_err(sql_err)?;
        Self::finish_open(embedding_model.into(), conn, &path.display().to_string())
    }

    fn finish_open(embedding_model: String, conn: Connection, label: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        reconcile_meta(&conn, &embedding_model, label)?;
        Ok(Self {
            embedding_model,
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::index("sqlite connection lock poisoned"))
    }
}

/// Compare stored meta against the configured model/schema; on mismatch,
/// wipe the chunk table and stamp the new meta.
fn reconcile_meta(conn: &Connection, embedding_model: &str, label: &str) -> Result<()> {
    let stored_model: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'embedding_model'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)?;
    let stored_version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)?;

    let mismatch = match (&stored_model, &stored_version) {
        (Some(model), Some(version)) => model != embedding_model || version != SCHEMA_VERSION,
        (None, None) => false,
        _ => true,
    };

    if mismatch {
        log::warn!(
            "vector store {label} was built with model {:?} / schema {:?} (configured: {:?} / {SCHEMA_VERSION}); starting empty",
            stored_model,
            stored_version,
            embedding_model
        );
        conn.execute("DELETE FROM chunks", []).map_err(sql_err)?;
    }

    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('embedding_model', ?1)",
        params![embedding_model],
    )
    .map_err(sql_err)?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION],
    )
    .map_err(sql_err)?;
    Ok(())
}

impl VectorIndex for SqliteIndex {
    fn add(&self, new_chunks: Vec<Chunk>) -> Result<usize> {
        if new_chunks.is_empty() {
            return Ok(0);
        }

        let mut guard = self.lock()?;

        let existing_bytes: Option<i64> = guard
            .query_row(
                "SELECT length(embedding) FROM chunks ORDER BY seq LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        let existing_dim = existing_bytes.map(|b| (b as usize) / 4);
        validate_batch(existing_dim, &new_chunks)?;

        let tx = guard.transaction().map_err(sql_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO chunks (id, source, content, embedding) VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(sql_err)?;
            for chunk in &new_chunks {
                stmt.execute(params![
                    chunk.id,
                    chunk.source,
                    chunk.text,
                    embedding_to_blob(&chunk.embedding),
                ])
                .map_err(sql_err)?;
            }
        }
        tx.commit().map_err(sql_err)?;
        Ok(new_chunks.len())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&[String]>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let candidates = {
            let guard = self.lock()?;
            let mut sql =
                String::from("SELECT id, source, content, embedding FROM chunks");
            if let Some(sources) = filter {
                if sources.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = vec!["?"; sources.len()].join(", ");
                sql.push_str(&format!(" WHERE source IN ({placeholders})"));
            }
            sql.push_str(" ORDER BY seq ASC");

            let mut stmt = guard.prepare(&sql).map_err(sql_err)?;
            let rows = match filter {
                Some(sources) => stmt
                    .query_map(params_from_iter(sources.iter()), row_to_chunk)
                    .map_err(sql_err)?
                    .collect::<std::result::Result<Vec<Chunk>, _>>()
                    .map_err(sql_err)?,
                None => stmt
                    .query_map([], row_to_chunk)
                    .map_err(sql_err)?
                    .collect::<std::result::Result<Vec<Chunk>, _>>()
                    .map_err(sql_err)?,
            };
            rows
        };

        let scored: Vec<ScoredChunk> = candidates
            .into_par_iter()
            .map(|chunk| ScoredChunk {
                score: cosine_similarity(query, &chunk.embedding),
                chunk,
            })
            .collect();

        Ok(take_top_k(scored, k))
    }

    fn stats(&self) -> Result<IndexStats> {
        let guard = self.lock()?;

        let chunk_count: i64 = guard
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(sql_err)?;

        let mut per_source: BTreeMap<String, usize> = BTreeMap::new();
        let mut stmt = guard
            .prepare("SELECT source, COUNT(*) FROM chunks GROUP BY source")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(sql_err)?;
        for row in rows {
            let (source, count) = row.map_err(sql_err)?;
            per_source.insert(source, count as usize);
        }

        Ok(IndexStats {
            chunk_count: chunk_count as usize,
            per_source,
            embedding_model: self.embedding_model.clone(),
        })
    }

    fn reset(&self) -> Result<()> {
        let guard = self.lock()?;
        guard.execute("DELETE FROM chunks", []).map_err(sql_err)?;
        Ok(())
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let blob: Vec<u8> = row.get(3)?;
    Ok(Chunk {
        id: row.get(0)?,
        source: row.get(1)?,
        text: row.get(2)?,
        embedding: blob_to_embedding(&blob),
    })
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::index(e.to_string())
}
