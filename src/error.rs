//! Error types for the live-update engine

use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An object referenced by name does not exist in the store
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Kind of the missing object
        kind: &'static str,
        /// Name of the missing object
        name: String,
    },

    /// An object with the same name already exists
    #[error("{kind} {name:?} already exists")]
    AlreadyExists {
        /// Kind of the conflicting object
        kind: &'static str,
        /// Name of the conflicting object
        name: String,
    },

    /// An optimistic-concurrency update lost the race
    #[error("conflict updating {kind} {name:?}: object was modified")]
    Conflict {
        /// Kind of the object that was concurrently modified
        kind: &'static str,
        /// Name of the object that was concurrently modified
        name: String,
    },

    /// Validation error for object specs
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Create a not-found error for the given kind and name
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an already-exists error for the given kind and name
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Create a conflict error for the given kind and name
    pub fn conflict(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Returns true if this is an optimistic-concurrency conflict
    ///
    /// Conflicts are expected during normal operation: the object changed
    /// under us, which re-enqueues a reconcile anyway.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
