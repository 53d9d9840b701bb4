//! Abstract interfaces consumed by the listener.
//!
//! Implementations must be safe to share between the test thread and the
//! polling worker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::EventQuery;
use crate::record::EventRecord;

/// Errors reported by an event source or object lookup backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend could not be reached; polling again may succeed.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an error.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A queryable stream of application events.
pub trait EventSource: Send + Sync {
    /// The `limit` most recent events, newest first.
    fn latest(&self, limit: usize) -> Result<Vec<EventRecord>, StorageError>;

    /// All events satisfying `query`.
    ///
    /// Ordering is not guaranteed; callers sort by id when it matters.
    fn filter(&self, query: &EventQuery) -> Result<Vec<EventRecord>, StorageError>;
}

/// A row of an object collection, as far as id resolution cares.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: i64,
    pub name: String,
}

/// Name lookup over the application's object collections (`vms`, `hosts`, ...).
pub trait ObjectLookup: Send + Sync {
    /// Objects in `collection` whose name equals `name`.
    fn find_by_name(&self, collection: &str, name: &str) -> Result<Vec<ObjectRef>, StorageError>;
}
