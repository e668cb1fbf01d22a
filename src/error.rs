//! Error types for the triage engine.

use std::time::Duration;

/// Top-level error type for the crate.
///
/// Orchestrator aborts are not errors: a session that aborts still
/// returns a `TriageResult` carrying its partial evidence and an
/// explicit aborted marker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

/// Extraction pattern errors.
///
/// Only raised when building an `Extractor` from configuration — extraction
/// itself never fails.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Invalid id pattern {name}: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// Retrieval engine errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Index queried before it was built")]
    IndexNotReady,

    #[error("Retrieval query timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Failed to load knowledge document {path}: {reason}")]
    CorpusLoad { path: String, reason: String },
}

/// Generation-capability errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Generation capability unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid response from generation capability: {reason}")]
    InvalidResponse { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reply composition errors.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("Strict mode requires at least one citation for an incident reply")]
    EmptyEvidenceForIncident,
}

/// Mailbox ingestion errors (binary-side collaborator).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Unsupported mailbox file extension: {0}")]
    UnsupportedExtension(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the triage engine.
pub type Result<T> = std::result::Result<T, Error>;
