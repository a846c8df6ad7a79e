//! Error types for the raggate gateway

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway
///
/// The variants map onto the failure taxonomy of the system: fatal
/// configuration problems, ingestion failures (parser / embedding), LLM
/// transport failures, and soft agent/tool failures that are reported
/// in-band rather than raised.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error while talking to the LLM runtime
    #[error("LLM runtime unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// Per-request deadline exceeded on an LLM call
    #[error("LLM request timed out")]
    Timeout,

    /// The LLM runtime answered with a malformed or unexpected body
    #[error("LLM protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error (persistence, uploads)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration; fatal at startup
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Uploaded file has a suffix no parser handles
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// Document parsed but yielded no extractable text
    #[error("Document contains no extractable text: {0}")]
    EmptyDocument(String),

    /// Embedding a chunk failed; the ingestion is rolled back as a whole
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Vector index storage failure
    #[error("Index error: {0}")]
    Index(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Agent loop failure (prompt construction, step bookkeeping)
    #[error("Agent error: {0}")]
    Agent(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a new embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Error::Embedding(msg.into())
    }

    /// Create a new index error
    pub fn index(msg: impl Into<String>) -> Self {
        Error::Index(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new agent error
    pub fn agent(msg: impl Into<String>) -> Self {
        Error::Agent(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// True for failures the ingestion caller should see as a bad request
    /// (unsupported format, empty document) rather than a server fault.
    pub fn is_ingest_rejection(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFormat(_) | Error::EmptyDocument(_) | Error::Config(_)
        )
    }
}

/// Map a reqwest failure to our taxonomy: timeouts become [`Error::Timeout`],
/// everything else stays a transport error.
pub fn from_reqwest(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else {
        Error::Http(err)
    }
}
