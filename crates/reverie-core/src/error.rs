//! Error types for the core vector store.

use thiserror::Error;

use crate::types::VectorId;

/// Errors that can occur in the vector store core.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Vector length does not match the store's configured dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No free slot remains in the buffer.
    #[error("vector buffer full (capacity {capacity})")]
    BufferFull { capacity: usize },

    /// No vector with the given id.
    #[error("vector not found: {0}")]
    NotFound(VectorId),

    /// Operation exceeded its deadline. Partial work has been rolled back.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Input failed a shape or range check.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Invariant violation inside the store. Always a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, StoreError>;
