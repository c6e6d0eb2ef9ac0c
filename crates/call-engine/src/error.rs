//! Error types for the call engine

use thiserror::Error;

/// Result type for call engine operations
pub type Result<T> = std::result::Result<T, CallEngineError>;

/// Errors that can occur while orchestrating or signaling a call
#[derive(Debug, Error)]
pub enum CallEngineError {
    /// Malformed or missing input
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Unknown or already-terminal session/chat
    #[error("not found: {message}")]
    NotFound { message: String },

    /// A conflicting call or resource claim already exists
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Actor is not allowed to perform the operation
    #[error("permission denied: {message}")]
    Permission { message: String },

    /// Operation is not valid for the session's current status
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// Durable store failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CallEngineError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a permission error
    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the transport acknowledgment
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Permission { .. } => "permission",
            Self::InvalidState { .. } => "state",
            Self::Database(_) => "database",
            Self::Internal { .. } => "internal",
        }
    }
}
