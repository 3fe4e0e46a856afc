//! Structured error kinds for the classification engine.
//!
//! Every expected failure mode crosses component boundaries as an
//! [`EngineError`] value; nothing in the hot path panics or throws across
//! a boundary. The gateway maps each kind to an HTTP status and a short
//! machine-readable wire code (see [`EngineError::wire_code`]), while the
//! CLI surfaces the human-readable `Display` form. Unexpected failures are
//! caught at the gateway boundary and reported as `internal`.

use thiserror::Error;

/// All expected failure modes of the classification engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request: out-of-range numeric fields or an unusable body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Input text was empty or whitespace-only after trimming.
    #[error("input text is empty after trimming")]
    EmptyText,

    /// No index snapshot has been published yet.
    #[error("no pattern index has been published")]
    IndexEmpty,

    /// The embedding provider failed to produce a vector.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Query vector dimension disagrees with the index dimension.
    /// Under the loader invariants this should never surface at query time.
    #[error("query dimension {query} does not match index dimension {index}")]
    DimensionMismatch { query: usize, index: usize },

    /// The request exceeded its wall-clock budget; work was abandoned at
    /// the next safepoint and no partial result is returned.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Too many classifications already in flight.
    #[error("too many in-flight classification requests")]
    Overloaded,

    /// Artifact failed structural, dimension, or norm validation during
    /// load. The previously published snapshot is left untouched.
    #[error("artifact rejected: {0}")]
    Load(String),

    /// The artifact was built under a different model or preprocessing
    /// policy than the running embedding provider.
    #[error("artifact model descriptor `{artifact}` does not match provider `{provider}`")]
    IncompatibleModel { artifact: String, provider: String },

    /// A search hit had no catalogue entry. Snapshots are built with
    /// vectors and patterns in lockstep, so this indicates a bug.
    #[error("pattern `{0}` has a vector but no catalogue entry")]
    UnknownPattern(String),
}

impl EngineError {
    /// Short machine-readable code carried in wire responses.
    ///
    /// The classification surface puts this in `errorMessage`; the reload
    /// surface puts it (plus detail) in `error`. Codes are stable: tests
    /// and callers match on them.
    pub fn wire_code(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::EmptyText => "empty_text",
            EngineError::IndexEmpty => "index_empty",
            EngineError::Embedding(_) => "embedding_failed",
            EngineError::DimensionMismatch { .. } => "search_failed",
            EngineError::DeadlineExceeded => "deadline_exceeded",
            EngineError::Overloaded => "overloaded",
            EngineError::Load(_) => "load_failed",
            EngineError::IncompatibleModel { .. } => "incompatible_model",
            EngineError::UnknownPattern(_) => "unknown_pattern",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_stable() {
        assert_eq!(EngineError::EmptyText.wire_code(), "empty_text");
        assert_eq!(EngineError::IndexEmpty.wire_code(), "index_empty");
        assert_eq!(
            EngineError::DeadlineExceeded.wire_code(),
            "deadline_exceeded"
        );
        assert_eq!(EngineError::Overloaded.wire_code(), "overloaded");
    }

    #[test]
    fn display_carries_detail() {
        let err = EngineError::DimensionMismatch {
            query: 128,
            index: 384,
        };
        let msg = err.to_string();
        assert!(msg.contains("128"));
        assert!(msg.contains("384"));
    }
}
