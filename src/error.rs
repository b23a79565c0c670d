//! Engine error taxonomy.
//!
//! Errors carry a recoverability classification: transient failures are
//! retried on the next scan cycle, everything else surfaces to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Recoverable I/O failure (network blip, store briefly unavailable).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Snapshot read exceeded the per-board budget.
    #[error("snapshot read for board {board_id} timed out after {seconds}s")]
    SnapshotTimeout { board_id: String, seconds: u64 },

    /// Snapshot failed structural validation (dangling edge, bad dates).
    #[error("snapshot integrity: {0}")]
    DataIntegrity(String),

    /// Internal invariant violation; a bug, not an input problem.
    #[error("logic error: {0}")]
    Logic(String),

    /// Feedback rating outside the 1-5 scale.
    #[error("rating {0} out of range (expected 1-5)")]
    InvalidRating(u8),

    /// Referenced record does not exist.
    #[error("unknown {kind} id: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),
}

impl EngineError {
    /// Transient errors are logged and retried on the next cycle; the rest
    /// indicate bad input or a bug and are surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::SnapshotTimeout { .. })
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}
