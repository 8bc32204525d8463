//! Typed errors surfaced at the engine boundary.
//!
//! Nothing-to-undo / nothing-to-redo are not errors; they are structured
//! `StepOutcome` results with `success = false`.
use thiserror::Error;

/// Errors an `EditLog` call can fail with.
#[derive(Debug, Error)]
pub enum OplogError {
    /// The underlying store failed a read or write. The operation must not
    /// be assumed committed; the caller should retry or alert the user.
    #[error("persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),

    /// The client's expected sequence number does not match the store's,
    /// indicating client/server desync. The client should resync by
    /// fetching the latest checkpoint plus subsequent operations.
    #[error("sequence conflict for session {session_id}: client expected {expected}, store is at {actual}")]
    SequenceConflict {
        session_id: String,
        expected: u64,
        actual: u64,
    },
}
