//! Error taxonomy for the embedding and context pipeline.
//!
//! Every failure is classified into an [`ErrorKind`]. Only the transient
//! kinds (storage write conflicts, connection failures, timeouts) are ever
//! retried by the job runner; everything else surfaces on the first attempt.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse classification used by retry policies and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    NoEmbeddingModel,
    WriteConflict,
    Connection,
    Timeout,
    Provider,
    Storage,
    Dispatch,
    Serialization,
}

impl ErrorKind {
    /// The closed set of kinds that may succeed if simply tried again.
    pub const TRANSIENT: [ErrorKind; 3] = [
        ErrorKind::WriteConflict,
        ErrorKind::Connection,
        ErrorKind::Timeout,
    ];

    pub fn is_transient(self) -> bool {
        Self::TRANSIENT.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidInput => "invalid_input",
            Self::NoEmbeddingModel => "no_embedding_model",
            Self::WriteConflict => "write_conflict",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Provider => "provider",
            Self::Storage => "storage",
            Self::Dispatch => "dispatch",
            Self::Serialization => "serialization",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("No embedding model configured. Configure [embedding] provider, model and dims.")]
    NoEmbeddingModel,

    /// The store rejected a write because of concurrent contention.
    #[error("storage write conflict: {0}")]
    WriteConflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// The embedding provider answered, but with something unusable.
    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// A background command could not be submitted.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NoEmbeddingModel => ErrorKind::NoEmbeddingModel,
            Self::WriteConflict(_) => ErrorKind::WriteConflict,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Dispatch(_) => ErrorKind::Dispatch,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contention_and_transport_errors_are_transient() {
        assert!(PipelineError::WriteConflict("busy".into()).is_transient());
        assert!(PipelineError::Connection("refused".into()).is_transient());
        assert!(PipelineError::Timeout("30s".into()).is_transient());

        assert!(!PipelineError::invalid("bad").is_transient());
        assert!(!PipelineError::NoEmbeddingModel.is_transient());
        assert!(!PipelineError::Provider("401".into()).is_transient());
        assert!(!PipelineError::Storage("syntax".into()).is_transient());
        assert!(!PipelineError::not_found("source:x").is_transient());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::WriteConflict).unwrap();
        assert_eq!(json, "\"write_conflict\"");
    }
}
