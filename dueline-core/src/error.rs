//! Error types for dueline operations

use crate::identity::{OwnerId, Timestamp, TodoId};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Todo {id} not found for owner {owner_id}")]
    NotFound { owner_id: OwnerId, id: TodoId },

    #[error("Insert failed: {reason}")]
    InsertFailed { reason: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Field {field} is too long: {actual} characters, at most {max} allowed")]
    TooLong {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("due_at is in the past: {due_at}")]
    DueDateInPast { due_at: Timestamp },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Cache backend errors.
///
/// These never abort a request: readers treat them as a miss and writers
/// log them and carry on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all dueline errors.
///
/// `Clone` is required: a single loader failure is handed to every caller
/// waiting on the same cache key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DuelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl DuelineError {
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// True when the requested todo is absent or owned by someone else.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(StorageError::NotFound { .. }))
    }

    /// True for semantic validation failures such as a past due date.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Result type alias for dueline operations.
pub type DuelineResult<T> = Result<T, DuelineError>;

// =============================================================================
// TESTS
// =============================================================================
