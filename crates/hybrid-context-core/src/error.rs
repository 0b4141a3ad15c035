//! Error taxonomy shared by the engine.
//!
//! Most functions return `anyhow::Result`; the variants here mark the
//! failures callers need to tell apart (via `downcast_ref::<EngineError>()`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The declared file type is not `pdf` or `text`.
    #[error("unsupported file type: '{0}' (expected pdf or text)")]
    UnsupportedFileType(String),

    /// The uploaded file produced no extractable text.
    #[error("document contains no text")]
    EmptyDocument,

    /// The file could not be parsed as its declared type.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// The query or its parameters are malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The document does not exist or belongs to another owner.
    #[error("document not found: {0}")]
    NotFound(String),

    /// A generative or embedding provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Embedding a chunk failed; the chunk cannot be stored as searchable.
    #[error("embedding failed for chunk {chunk_index}: {message}")]
    Embedding { chunk_index: usize, message: String },

    /// A batch enrichment job reached a terminal failure state.
    #[error("batch job {batch_id} ended with status '{status}'")]
    BatchJobFailed { batch_id: String, status: String },

    /// A batch enrichment job did not finish within the deadline.
    #[error("batch job {batch_id} timed out after {secs}s")]
    BatchTimeout { batch_id: String, secs: u64 },
}

impl EngineError {
    /// Errors the caller caused and can fix by changing the request.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::UnsupportedFileType(_)
                | EngineError::EmptyDocument
                | EngineError::MalformedDocument(_)
                | EngineError::InvalidQuery(_)
                | EngineError::NotFound(_)
        )
    }

    /// Terminal batch states that abort a document's enrichment pass.
    pub fn is_batch_failure(&self) -> bool {
        matches!(
            self,
            EngineError::BatchJobFailed { .. } | EngineError::BatchTimeout { .. }
        )
    }
}
