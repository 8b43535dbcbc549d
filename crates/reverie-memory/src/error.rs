//! Error types for the memory crate.

use thiserror::Error;

/// Errors that can occur in the persona memory layer.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Vector store operation failed.
    #[error("Vector store error: {0}")]
    Store(#[from] reverie_core::StoreError),

    /// Input failed a shape or range check.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested persona, memory, or conversation does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Buffer full or persona over cap and cleanup could not free enough.
    /// Retryable after eviction.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Embedding provider or metadata store dependency failed; possibly
    /// transient and retried with backoff before surfacing.
    #[error("Dependency failure: {0}")]
    Dependency(String),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// Whether a bounded local retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, MemoryError::Dependency(_))
    }
}
