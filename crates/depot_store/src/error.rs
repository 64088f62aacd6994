//! Error types for store backends.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error from a persistent backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Document serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The query could not be evaluated by this store.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// Backend-specific failure.
    #[error("store backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::invalid_query("bad $sort");
        assert!(err.to_string().contains("bad $sort"));

        let err = StoreError::backend("disk full");
        assert!(err.to_string().contains("disk full"));
    }
}
