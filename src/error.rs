//! Error types for the row model and scripting bridge.
//!
//! - `InvalidArgument` and `PreconditionViolation` are API misuse and are
//!   returned at the call site.
//! - `RowProcessingFailure` wraps a failure of one row's transformation. It is
//!   captured in [`crate::Memory`] instead of aborting the run.

use thiserror::Error;

use crate::model::RowId;

/// Errors raised by the row model, the memory and the scripting bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// A required argument was missing or out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was called on an object that is not ready for it.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// A column name collides with a reserved binding name.
    #[error("Column '{0}' collides with a reserved binding name")]
    ReservedNameCollision(String),

    /// A transformation failed while processing a specific row.
    #[error("Processing of row {row} failed: {source}")]
    RowProcessingFailure {
        row: RowId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for row model operations.
pub type Result<T> = std::result::Result<T, Error>;
