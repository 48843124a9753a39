//! Error types for the board engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, BoardError>;

/// Errors that can occur in engine operations
#[derive(Debug, Error)]
pub enum BoardError {
    /// A patch or move would break the order-uniqueness invariant.
    /// Raised before anything is mutated.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// The operation references an id absent from the store
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// The remote call failed
    #[error("persisting '{op}' failed: {message}")]
    Persistence { op: String, message: String },

    /// The remote call did not resolve in time
    #[error("persisting '{op}' timed out after {elapsed_ms}ms")]
    Timeout { op: String, elapsed_ms: u64 },

    /// A remote result arrived after a newer local mutation superseded it
    #[error("stale response for '{op}' discarded")]
    StaleResponse { op: String },

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BoardError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Remote failures and timeouts both trigger the rollback-or-report policy
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::Persistence { .. } | Self::Timeout { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<figment::Error> for BoardError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BoardError::not_found("card", "c1");
        assert_eq!(err.to_string(), "card not found: c1");
    }

    #[test]
    fn test_validation_error() {
        let err = BoardError::validation("order 1 already held by c2");
        assert!(err.to_string().contains("order 1 already held"));
    }

    #[test]
    fn test_persistence_classification() {
        assert!(BoardError::persistence("move card", "503").is_persistence_failure());
        let timeout = BoardError::Timeout {
            op: "move card".into(),
            elapsed_ms: 10,
        };
        assert!(timeout.is_persistence_failure());
        assert!(timeout.is_retryable());
        assert!(!BoardError::StaleResponse { op: "x".into() }.is_persistence_failure());
        assert!(!BoardError::validation("x").is_retryable());
    }
}
