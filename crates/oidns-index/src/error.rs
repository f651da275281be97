//! Error types for the object index.

use oidns_types::ObjectId;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// An object with this numeric id is already indexed.
    ///
    /// Callers treat this as index/namespace divergence, not as a
    /// recoverable condition.
    #[error("object already indexed: {0}")]
    Duplicate(ObjectId),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
