//! Error taxonomy for the extraction pipeline (spec §7).
//!
//! Four classes exist, in order of how a caller should react:
//!
//! - [`Error::is_systemic`] errors cross the streaming boundary and abort
//!   the whole extraction.
//! - Content errors (schema decode failures, ontology-index-unavailable,
//!   per-violation correction failures) are recovered locally: a chunk
//!   yields an empty fragment, a retrieval falls back to a deterministic
//!   slice, a correction downgrades to `skip`.
//! - Structural errors are fatal at ontology-load or shape-derivation time.
//! - Defects (anything unexpected) are logged as warnings at the chunk level
//!   and otherwise treated like content errors.

use thiserror::Error;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the extraction pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The LLM backend rejected the request due to rate limiting. Systemic.
    #[error("LLM rate limit: {0}")]
    LlmRateLimit(String),

    /// The LLM call exceeded its configured timeout. Systemic.
    #[error("LLM timeout: {0}")]
    LlmTimeout(String),

    /// The LLM returned a response that did not conform to the requested
    /// schema after exhausting retries. Content.
    #[error("LLM schema error: {0}")]
    LlmSchemaError(String),

    /// Any other AI-service-level failure (auth, malformed request, ...).
    #[error("AI service error: {0}")]
    AiService(String),

    /// A network error classified as connectivity loss (refused,
    /// timed-out, unknown host). Systemic.
    #[error("network connectivity error: {0}")]
    NetworkConnectivity(String),

    /// A network error that is not connectivity loss (4xx, malformed
    /// payload, ...). Content.
    #[error("network error: {0}")]
    Network(String),

    /// The RDF/data store could not be reached. Systemic.
    #[error("data store connection error: {0}")]
    StoreConnection(String),

    /// The RDF/data store rejected an operation it was reachable for
    /// (malformed query, constraint violation). Content.
    #[error("data store error: {0}")]
    Store(String),

    /// JSON (de)serialization failure. Content.
    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The ontology's hierarchy or property-hierarchy map contains a cycle.
    /// Structural — fatal at load time.
    #[error("ontology hierarchy cycle detected at {0}")]
    OntologyCycle(String),

    /// The ontology-level lexical/vector index could not be built for a
    /// single retrieval call. Content — caller falls back to a deterministic
    /// slice.
    #[error("ontology index unavailable: {0}")]
    OntologyIndexUnavailable(String),

    /// SHACL shape derivation received malformed ontology data. Structural.
    #[error("malformed ontology for shape derivation: {0}")]
    MalformedOntology(String),

    /// `RunConfig` failed schema validation. Structural.
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    /// A chunk-level extraction error whose cause is not itself systemic.
    /// Content.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// An uncaught panic/defect surfaced at a task boundary. Treated like a
    /// content error except that it always logs at `warn`.
    #[error("unexpected defect: {0}")]
    Defect(String),

    /// I/O error, e.g. reading a local ontology file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Systemic errors propagate up, abort the stream, and fail the whole
    /// extraction (spec §4.11, §7).
    #[must_use]
    pub const fn is_systemic(&self) -> bool {
        matches!(
            self,
            Self::LlmRateLimit(_)
                | Self::LlmTimeout(_)
                | Self::NetworkConnectivity(_)
                | Self::StoreConnection(_)
        )
    }

    /// Structural errors are fatal at load time and never recovered from
    /// inside a running pipeline.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::OntologyCycle(_) | Self::MalformedOntology(_) | Self::InvalidConfig(_)
        )
    }

    /// A short, stable tag used as `chunk.error_type` on failed-chunk spans.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::LlmRateLimit(_) => "llm_rate_limit",
            Self::LlmTimeout(_) => "llm_timeout",
            Self::LlmSchemaError(_) => "llm_schema_error",
            Self::AiService(_) => "ai_service",
            Self::NetworkConnectivity(_) => "network_connectivity",
            Self::Network(_) => "network",
            Self::StoreConnection(_) => "store_connection",
            Self::Store(_) => "store",
            Self::JsonParse(_) => "json_parse",
            Self::OntologyCycle(_) => "ontology_cycle",
            Self::OntologyIndexUnavailable(_) => "ontology_index_unavailable",
            Self::MalformedOntology(_) => "malformed_ontology",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Extraction(_) => "extraction",
            Self::Defect(_) => "defect",
            Self::Io(_) => "io",
        }
    }
}

/// The user-visible failure of `ExtractionWorkflow::extract` (spec §7):
/// always a single wrapper carrying the originating cause and the input
/// text (truncated) for diagnosis.
#[derive(Error, Debug)]
#[error("extraction failed: {message}")]
pub struct ExtractionError {
    pub message: String,
    #[source]
    pub cause: Error,
    /// The input text, truncated to a bounded prefix for log/display safety.
    pub text: String,
}

impl ExtractionError {
    const TEXT_PREVIEW_CHARS: usize = 500;

    #[must_use]
    pub fn new(cause: Error, text: &str) -> Self {
        let message = cause.to_string();
        let preview: String = text.chars().take(Self::TEXT_PREVIEW_CHARS).collect();
        Self {
            message,
            cause,
            text: preview,
        }
    }
}
