//! Unified error handling for the fanout crate
//!
//! This module provides a single `Error` enum that consolidates all failure
//! modes of the scheduler: store access, admission control, task lifecycle,
//! dispatch, and executor outcomes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fanout::error::{Error, Result};
//!
//! fn handle_error(err: Error) {
//!     if err.is_retryable() {
//!         println!("Retrying: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the fanout crate
#[derive(Error, Debug)]
pub enum Error {
    /// A task with the same id already exists
    #[error("Duplicate task id: {id}")]
    DuplicateTask { id: String },

    /// Task record does not exist
    #[error("Task not found: {id}")]
    NotFound { id: String },

    /// Admission wait budget exhausted for a concurrency scope
    #[error("Capacity exceeded for scope '{scope}' after {waited_ms}ms")]
    CapacityExceeded { scope: String, waited_ms: u64 },

    /// Shared state store could not be reached
    #[error("State store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// Task status transition that the lifecycle forbids
    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Executor reported a permanent failure; the task will not be retried
    #[error("Executor fatal error: {0}")]
    ExecutorFatal(String),

    /// Executor reported a transient failure; the task may be re-queued
    #[error("Executor retryable error: {0}")]
    ExecutorRetryable(String),

    /// Work dispatch submission or revocation failed
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis protocol or connection errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a duplicate-task error
    pub fn duplicate_task(id: impl Into<String>) -> Self {
        Self::DuplicateTask { id: id.into() }
    }

    /// Create a not-found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a capacity-exceeded error
    pub fn capacity_exceeded(scope: impl Into<String>, waited_ms: u64) -> Self {
        Self::CapacityExceeded {
            scope: scope.into(),
            waited_ms,
        }
    }

    /// Create a store-unavailable error
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid-transition error
    pub fn invalid_transition(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a dispatch error
    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Check if this error is retryable (the operation may succeed later)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CapacityExceeded { .. } => true,
            Self::ExecutorRetryable(_) => true,
            Self::StoreUnavailable { .. } => true,
            Self::Redis(_) => true,
            Self::Dispatch(_) => true,
            Self::DuplicateTask { .. } => false,
            Self::NotFound { .. } => false,
            Self::InvalidTransition { .. } => false,
            Self::ExecutorFatal(_) => false,
            Self::Config(_) => false,
            Self::Serialization(_) => false,
            Self::Other { .. } => false,
        }
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::StoreUnavailable {
            reason: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(Error::capacity_exceeded("account:a1", 30_000).is_retryable());
        assert!(Error::ExecutorRetryable("timeout".into()).is_retryable());
        assert!(Error::store_unavailable("connection refused").is_retryable());

        assert!(!Error::ExecutorFatal("account banned".into()).is_retryable());
        assert!(!Error::duplicate_task("t1").is_retryable());
        assert!(!Error::config("bad strategy").is_retryable());
    }

    #[test]
    fn test_capacity_exceeded_display() {
        let err = Error::capacity_exceeded("account:a1", 30_000);
        let msg = err.to_string();
        assert!(msg.contains("account:a1"));
        assert!(msg.contains("30000"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::invalid_transition("t1", "success", "running");
        assert!(err.to_string().contains("success -> running"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(!err.is_retryable());
    }
}
