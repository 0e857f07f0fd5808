//! Error types for the engram core library.

use thiserror::Error;

/// Top-level error type for all engram operations.
///
/// Validation and storage failures are caller-visible; embedding failures
/// are internal state transitions (the affected entry becomes `Failed` and
/// is retried by the next reconciliation pass).
#[derive(Error, Debug)]
pub enum EngramError {
    /// Sanitized content still exceeds the per-entry byte ceiling, or is
    /// otherwise unfit for admission. The insert is refused with no
    /// partial state.
    #[error("content rejected: {reason}")]
    Validation {
        /// Why the content was rejected.
        reason: String,
    },

    /// No live record exists for the given memory ID.
    #[error("memory not found: {0}")]
    NotFound(crate::MemoryId),

    /// A caller supplied an argument outside its valid range.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Which argument was invalid and why.
        reason: String,
    },

    /// The embedding provider failed or timed out. Never surfaced as a
    /// hard failure of `insert`; the entry persists without a vector.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A caller-facing operation was invoked before `reconcile()` ran.
    #[error("engine not ready: reconcile() must complete before serving traffic")]
    NotReady,

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error. This is the durable-write failure path:
    /// fatal for the triggering operation, propagated to the caller.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, EngramError>;
