//! Error types for the message index.
//!
//! Lookups never surface errors (a missing key is an empty answer). Only
//! infrastructure failures (lock, storage, queue) and failing group
//! enumeration reach callers of a rebuild.

use thiserror::Error;

/// Common message index error conditions.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The rebuild lock could not be obtained.
    #[error("unable to acquire lock for index '{name}' after {waited_ms}ms")]
    LockUnavailable { name: String, waited_ms: u64 },

    /// The lock backend itself failed (not mere contention).
    #[error("lock backend failure: {message}")]
    Lock { message: String },

    /// Backing store read or write failed.
    #[error("storage failure: {message}")]
    Storage { message: String },

    /// A persisted snapshot entry violates the snapshot invariants.
    #[error("invalid snapshot: {message}")]
    InvalidSnapshot { message: String },

    /// A message group failed while enumerating its keys.
    #[error("group '{group_id}' failed to enumerate keys: {message}")]
    GroupKeys { group_id: String, message: String },

    /// No registered group has this id.
    #[error("group '{group_id}' is not registered")]
    UnknownGroup { group_id: String },

    /// The task queue rejected an enqueue.
    #[error("task queue unavailable: {message}")]
    QueueUnavailable { message: String },

    /// Filesystem error from a file-backed collaborator.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Create a LockUnavailable error.
    pub fn lock_unavailable(name: impl Into<String>, waited_ms: u64) -> Self {
        Self::LockUnavailable {
            name: name.into(),
            waited_ms,
        }
    }

    /// Create a Storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a GroupKeys error.
    pub fn group_keys(group_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GroupKeys {
            group_id: group_id.into(),
            message: message.into(),
        }
    }

    /// Check if retrying the same call later may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable { .. } | Self::QueueUnavailable { .. }
        )
    }
}

/// Result type using IndexError.
pub type IndexResult<T> = Result<T, IndexError>;
