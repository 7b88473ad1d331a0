//! Error types for the chat system.

use parley_database::DatabaseError;
use thiserror::Error;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors surfaced to callers of the fan-out core.
///
/// Cache and publish failures after a successful write are not represented
/// here: they never fail the caller and are recorded in
/// [`FanoutMetrics`](crate::fanout::FanoutMetrics) instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Malformed input, rejected before any side effect.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The requester is not allowed to act on the conversation.
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Position collision or duplicate identity.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Store, bus or sequencer temporarily unavailable; the whole operation may be retried.
    #[error("Temporarily unavailable: {message}")]
    Transient { message: String },
}

impl ChatError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an authorization error
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Stable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Validation { .. } => "VALIDATION",
            ChatError::Unauthorized { .. } => "UNAUTHORIZED",
            ChatError::NotFound { .. } => "NOT_FOUND",
            ChatError::Conflict { .. } => "CONFLICT",
            ChatError::Transient { .. } => "TRANSIENT",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Transient { .. })
    }
}

impl From<DatabaseError> for ChatError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Duplicate(message) => Self::conflict(message),
            DatabaseError::NotFound(resource) => Self::not_found(resource),
            DatabaseError::ValidationError(message) => Self::validation(message),
            other => Self::transient(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(err: redis::RedisError) -> Self {
        Self::transient(format!("redis error: {err}"))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::transient(format!("identity lookup failed: {err}"))
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::transient(format!("write task aborted: {err}"))
    }
}
