//! Error types for the collection pipeline.

use crate::script::ScriptFailure;
use depot_store::StoreError;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for collection operations.
pub type CollectionResult<T> = Result<T, CollectionError>;

/// Property name to human-readable reason, in a stable order.
pub type ValidationErrors = BTreeMap<String, String>;

/// Where a validation error map came from.
///
/// Schema errors and script-reported errors share the wire shape but
/// differ in origin; the origin is preserved for testability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Produced by schema validation.
    Schema,
    /// Collected through a script domain's `error(...)` calls.
    Script,
}

/// Errors that can occur while handling a collection request.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The payload failed validation; maps to `{"errors": {...}}`.
    #[error("validation failed on {} properties", .errors.len())]
    Validation {
        /// Property name to reason.
        errors: ValidationErrors,
        /// Whether the schema or a script produced the errors.
        origin: ErrorOrigin,
    },

    /// The caller is not permitted to perform the operation.
    #[error("{message}")]
    Forbidden {
        /// Human-readable reason.
        message: String,
    },

    /// An id-scoped read or write precondition found nothing.
    #[error("{message}")]
    NotFound {
        /// Human-readable reason.
        message: String,
    },

    /// The request shape is unusable.
    #[error("{message}")]
    BadRequest {
        /// Human-readable reason.
        message: String,
    },

    /// An event script failed at the engine level.
    #[error(transparent)]
    Script(#[from] ScriptFailure),

    /// The document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CollectionError {
    /// Creates a validation error produced by schema validation.
    pub fn schema_errors(errors: ValidationErrors) -> Self {
        Self::Validation {
            errors,
            origin: ErrorOrigin::Schema,
        }
    }

    /// Creates a validation error collected from a script domain.
    pub fn script_errors(errors: ValidationErrors) -> Self {
        Self::Validation {
            errors,
            origin: ErrorOrigin::Script,
        }
    }

    /// Creates a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code this error maps to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::BadRequest { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Script(_) | Self::Store(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// Returns the origin of the validation errors, if this is a
    /// validation error.
    #[must_use]
    pub fn validation_origin(&self) -> Option<ErrorOrigin> {
        match self {
            Self::Validation { origin, .. } => Some(*origin),
            _ => None,
        }
    }

    /// Renders the wire body for this error.
    ///
    /// Validation errors render as `{"errors": {...}}`; everything else
    /// as `{"message": ..., "statusCode": ...}`.
    #[must_use]
    pub fn to_body(&self) -> Value {
        match self {
            Self::Validation { errors, .. } => json!({ "errors": errors }),
            other => json!({
                "message": other.to_string(),
                "statusCode": other.status_code(),
            }),
        }
    }
}
