//! # Gateway configuration
//!
//! Three layers, highest wins: environment variables > YAML file > compiled
//! defaults. The YAML file path comes from `RAGGATE_CONFIG` (default
//! `config.yaml`); a missing file is fine, a malformed one is fatal. Every
//! option has an uppercase environment variable of the same name
//! (`rag_top_k` -> `RAG_TOP_K`).
//!
//! Validation runs once after all layers are applied; any violation is a
//! fatal [`Error::Config`] and the process exits non-zero.

use crate::rag::RagSettings;
use crate::types::{BackendKind, VectorStoreMode};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Fully resolved gateway configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_host: String,
    pub server_port: u16,

    pub llm_base_url: String,
    pub llm_timeout_seconds: u64,
    pub llm_pool_size: usize,
    pub llm_generation_model: String,
    pub llm_embedding_model: String,

    pub rag_enabled: bool,
    pub rag_top_k: usize,
    pub rag_max_context_chars: usize,
    pub rag_chunk_size: usize,
    pub rag_chunk_overlap: usize,
    pub rag_backend_default: BackendKind,
    pub rag_vectorstore: VectorStoreMode,
    pub rag_vectorstore_path: PathBuf,
    pub rag_upload_dir: Option<PathBuf>,

    pub agent_max_steps: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8000,
            llm_base_url: "http://localhost:11434".to_string(),
            llm_timeout_seconds: 120,
            llm_pool_size: 8,
            llm_generation_model: "llama3.2".to_string(),
            llm_embedding_model: "nomic-embed-text".to_string(),
            rag_enabled: true,
            rag_top_k: 4,
            rag_max_context_chars: 6000,
            rag_chunk_size: 800,
            rag_chunk_overlap: 200,
            rag_backend_default: BackendKind::Manual,
            rag_vectorstore: VectorStoreMode::Flat,
            rag_vectorstore_path: PathBuf::from("data/vectorstore"),
            rag_upload_dir: None,
            agent_max_steps: 5,
        }
    }
}

/// YAML layer: every field optional; absent fields keep the lower layer.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    server_host: Option<String>,
    server_port: Option<u16>,
    llm_base_url: Option<String>,
    llm_timeout_seconds: Option<u64>,
    llm_pool_size: Option<usize>,
    llm_generation_model: Option<String>,
    llm_embedding_model: Option<String>,
    rag_enabled: Option<bool>,
    rag_top_k: Option<usize>,
    rag_max_context_chars: Option<usize>,
    rag_chunk_size: Option<usize>,
    rag_chunk_overlap: Option<usize>,
    rag_backend_default: Option<String>,
    rag_vectorstore: Option<String>,
    rag_vectorstore_path: Option<PathBuf>,
    rag_upload_dir: Option<PathBuf>,
    agent_max_steps: Option<u32>,
}

impl Settings {
    /// Load the full stack: defaults, then the YAML file (if present), then
    /// environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let path = std::env::var("RAGGATE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
        let mut settings = if Path::new(&path).exists() {
            let raw = std::fs::read_to_string(&path)?;
            log::info!("loading configuration from {path}");
            Self::from_yaml_str(&raw)?
        } else {
            Self::default()
        };

        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overlaid with one YAML document. Not yet validated.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: FileSettings = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("malformed config file: {e}")))?;

        let mut s = Self::default();
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = file.$field {
                    s.$field = v;
                }
            };
        }
        take!(server_host);
        take!(server_port);
        take!(llm_base_url);
        take!(llm_timeout_seconds);
        take!(llm_pool_size);
        take!(llm_generation_model);
        take!(llm_embedding_model);
        take!(rag_enabled);
        take!(rag_top_k);
        take!(rag_max_context_chars);
        take!(rag_chunk_size);
        take!(rag_chunk_overlap);
        take!(rag_vectorstore_path);
        take!(agent_max_steps);

        if let Some(raw) = file.rag_backend_default {
            s.rag_backend_default = raw.parse().map_err(Error::Config)?;
        }
        if let Some(raw) = file.rag_vectorstore {
            s.rag_vectorstore = raw.parse().map_err(Error::Config)?;
        }
        if let Some(dir) = file.rag_upload_dir {
            s.rag_upload_dir = Some(dir);
        }
        Ok(s)
    }

    /// Apply environment overrides through an injectable lookup (tests pass
    /// a map; production passes `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("SERVER_HOST") {
            self.server_host = v;
        }
        if let Some(v) = lookup("SERVER_PORT") {
            self.server_port = parse_field("SERVER_PORT", &v)?;
        }
        if let Some(v) = lookup("LLM_BASE_URL") {
            self.llm_base_url = v;
        }
        if let Some(v) = lookup("LLM_TIMEOUT_SECONDS") {
            self.llm_timeout_seconds = parse_field("LLM_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("LLM_POOL_SIZE") {
            self.llm_pool_size = parse_field("LLM_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("LLM_GENERATION_MODEL") {
            self.llm_generation_model = v;
        }
        if let Some(v) = lookup("LLM_EMBEDDING_MODEL") {
            self.llm_embedding_model = v;
        }
        if let Some(v) = lookup("RAG_ENABLED") {
            self.rag_enabled = parse_bool("RAG_ENABLED", &v)?;
        }
        if let Some(v) = lookup("RAG_TOP_K") {
            self.rag_top_k = parse_field("RAG_TOP_K", &v)?;
        }
        if let Some(v) = lookup("RAG_MAX_CONTEXT_CHARS") {
            self.rag_max_context_chars = parse_field("RAG_MAX_CONTEXT_CHARS", &v)?;
        }
        if let Some(v) = lookup("RAG_CHUNK_SIZE") {
            self.rag_chunk_size = parse_field("RAG_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("RAG_CHUNK_OVERLAP") {
            self.rag_chunk_overlap = parse_field("RAG_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("RAG_BACKEND_DEFAULT") {
            self.rag_backend_default = v.parse().map_err(Error::Config)?;
        }
        if let Some(v) = lookup("RAG_VECTORSTORE") {
            self.rag_vectorstore = v.parse().map_err(Error::Config)?;
        }
        if let Some(v) = lookup("RAG_VECTORSTORE_PATH") {
            self.rag_vectorstore_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("RAG_UPLOAD_DIR") {
            self.rag_upload_dir = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        if let Some(v) = lookup("AGENT_MAX_STEPS") {
            self.agent_max_steps = parse_field("AGENT_MAX_STEPS", &v)?;
        }
        Ok(())
    }

    /// Reject configurations the rest of the system cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.llm_base_url.trim().is_empty() {
            return Err(Error::config("llm_base_url must not be empty"));
        }
        if self.llm_timeout_seconds == 0 {
            return Err(Error::config("llm_timeout_seconds must be positive"));
        }
        if self.llm_pool_size == 0 {
            return Err(Error::config("llm_pool_size must be positive"));
        }
        if self.llm_generation_model.trim().is_empty() {
            return Err(Error::config("llm_generation_model must not be empty"));
        }
        if self.llm_embedding_model.trim().is_empty() {
            return Err(Error::config("llm_embedding_model must not be empty"));
        }
        if self.rag_chunk_size == 0 {
            return Err(Error::config("rag_chunk_size must be positive"));
        }
        if self.rag_chunk_overlap >= self.rag_chunk_size {
            return Err(Error::config(format!(
                "rag_chunk_overlap ({}) must be smaller than rag_chunk_size ({})",
                self.rag_chunk_overlap, self.rag_chunk_size
            )));
        }
        if self.agent_max_steps == 0 {
            return Err(Error::config("agent_max_steps must be at least 1"));
        }
        Ok(())
    }

    /// Address the server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// JSON file the manual backend persists to.
    pub fn manual_index_file(&self) -> PathBuf {
        self.rag_vectorstore_path.join("manual_index.json")
    }

    /// Directory the framework backend's persistent store lives in.
    pub fn framework_store_dir(&self) -> PathBuf {
        self.rag_vectorstore_path.join("framework")
    }

    /// The per-backend tunables both RAG backends are built from.
    pub fn rag_settings(&self) -> RagSettings {
        RagSettings {
            embedding_model: self.llm_embedding_model.clone(),
            chunk_size: self.rag_chunk_size,
            chunk_overlap: self.rag_chunk_overlap,
            top_k: self.rag_top_k,
            max_context_chars: self.rag_max_context_chars,
            upload_dir: self.rag_upload_dir.clone(),
        }
    }
}

fn parse_field<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::config(format!("{name}={raw}: {e}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{name}={raw}: expected a boolean"))),
    }
}
