//! Error types for eventwatch.
//!
//! Errors are split by how a caller is expected to react to them:
//! configuration mistakes are fatal, unresolved references are transient,
//! and matcher misuse is a programming error.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors raised while building expectations.
///
/// These indicate a test-authoring bug and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown event attribute '{name}'")]
    UnknownAttribute {
        name: String,
    },

    #[error("Event attribute bundle must have exactly one key=value pair, got {keys}")]
    MalformedBundle {
        keys: usize,
    },

    #[error("Reference event has no id")]
    MissingEventId,

    #[error("Invalid comparator pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },
}

/// Errors raised when matchers are compared incorrectly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("Incorrect attribute is passed: expected '{expected}', got '{actual}'")]
    NameMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Errors raised while resolving a target reference to a database id.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(
        "Type {target_type} is not specified in the auto-coercion target types. \
         Pass a real id of the object or extend the table."
    )]
    UnmappedType {
        target_type: String,
    },

    #[error("{target_type} with name {name} not found")]
    NotFound {
        target_type: String,
        name: String,
    },

    #[error("Target reference {value} is neither an id nor a name")]
    InvalidReference {
        value: String,
    },

    #[error("Object lookup failed: {0}")]
    Source(#[from] StorageError),
}

impl ResolveError {
    /// True when the referenced object may simply not exist yet.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Listener lifecycle errors.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Event listener is already running")]
    AlreadyRunning,

    #[error("Failed to spawn listener worker: {message}")]
    Spawn {
        message: String,
    },

    #[error("Listener worker panicked")]
    WorkerPanicked,

    #[error("Polling pass started from inside a running pass")]
    ReentrantPoll,

    #[error("Poisoned lock: {context}")]
    PoisonedLock {
        context: &'static str,
    },
}

/// Top-level error type for eventwatch.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),
}

impl EventError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a matcher misuse error.
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this error may go away by polling again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Match(_) | Self::Listener(_) => false,
            Self::Resolve(e) => match e {
                ResolveError::NotFound { .. } => true,
                ResolveError::Source(s) => s.is_retryable(),
                _ => false,
            },
            Self::Storage(e) => e.is_retryable(),
        }
    }
}

/// Result type alias for eventwatch operations.
pub type EventResult<T> = Result<T, EventError>;
