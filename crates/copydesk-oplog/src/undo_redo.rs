//! Undo/redo over the operation log.
//!
//! There is no separate undo/redo stack: "undoable" means the most recent
//! operation with `undone = false`, "redoable" the least recent with
//! `undone = true`. Undoing flips the flag and emits an inverse operation
//! for the editor to apply; the history itself is never deleted here.
//!
//! Policy note: appending a new operation does NOT invalidate redo.
//! Undone operations stay redoable until a later edit physically
//! overwrites their span.
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::operation::{Operation, OperationKind};
use crate::store::OperationStore;

/// One instruction for the editor: apply `apply` to the live document.
///
/// For undo this is the inverse of the stored operation; for redo it is
/// the original.
#[derive(Debug, Clone)]
pub struct EditStep {
    /// Id of the stored operation this step derives from.
    pub operation_id: Uuid,
    /// Its sequence number.
    pub seq: u64,
    /// The mutation the editor should apply.
    pub apply: OperationKind,
}

/// Result of an undo or redo request.
///
/// `success = false` with a message means there was nothing to do; it is
/// not an error.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub success: bool,
    /// Steps in application order.
    pub steps: Vec<EditStep>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub message: Option<String>,
}

impl StepOutcome {
    fn nothing(message: &str, can_undo: bool, can_redo: bool) -> Self {
        Self {
            success: false,
            steps: Vec::new(),
            can_undo,
            can_redo,
            message: Some(message.to_string()),
        }
    }
}

/// Point-in-time view of a session's undo/redo state for UI controls.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub can_undo: bool,
    pub can_redo: bool,
    /// Name of the most recently appended operation, if any.
    pub last_operation: Option<&'static str>,
    pub last_seq: Option<u64>,
}

/// Walks the undone flag on stored operations to implement undo/redo
/// without deleting history.
pub struct UndoRedoCoordinator {
    store: Arc<OperationStore>,
}

impl UndoRedoCoordinator {
    pub fn new(store: Arc<OperationStore>) -> Self {
        Self { store }
    }

    /// Undoes the `count` most recent not-yet-undone operations.
    ///
    /// Operations are marked undone newest-first and an inverse operation
    /// is emitted for each, in that order. Checkpoints are skipped; they
    /// are never individually undone. All flags flip in one write
    /// transaction, so on storage failure no operation is marked and the
    /// editor's view stays consistent with the log.
    ///
    /// # Errors
    ///
    /// Returns an error only on storage failure. An empty selection or a
    /// `count` of zero is a `success = false` outcome, not an error.
    pub fn undo(&self, session_id: &str, count: usize) -> Result<StepOutcome> {
        let ops = self.store.operations(session_id)?;
        let undoable: Vec<&Operation> = ops
            .iter()
            .filter(|op| !op.is_checkpoint() && !op.undone)
            .collect();
        let can_redo = ops.iter().any(|op| op.undone);

        if undoable.is_empty() {
            return Ok(StepOutcome::nothing("Nothing to undo", false, can_redo));
        }
        if count == 0 {
            return Ok(StepOutcome::nothing("Nothing to undo", true, can_redo));
        }

        let take = count.min(undoable.len());
        // Newest first
        let selected: Vec<&Operation> = undoable.iter().rev().take(take).copied().collect();
        let seqs: Vec<u64> = selected.iter().map(|op| op.seq).collect();
        self.store.set_undone_many(session_id, &seqs, true)?;

        let mut steps = Vec::with_capacity(take);
        for op in selected {
            steps.push(EditStep {
                operation_id: op.id,
                seq: op.seq,
                apply: op.kind.invert(),
            });
            tracing::debug!(session_id, seq = op.seq, "operation undone");
        }

        Ok(StepOutcome {
            success: true,
            steps,
            can_undo: undoable.len() > take,
            can_redo: true,
            message: None,
        })
    }

    /// Redoes the `count` oldest undone operations.
    ///
    /// Operations are unmarked oldest-first and the original operation is
    /// emitted for replay, in that order. All flags flip in one write
    /// transaction, so on storage failure none is unmarked.
    ///
    /// # Errors
    ///
    /// Returns an error only on storage failure. An empty selection or a
    /// `count` of zero is a `success = false` outcome, not an error.
    pub fn redo(&self, session_id: &str, count: usize) -> Result<StepOutcome> {
        let ops = self.store.operations(session_id)?;
        let redoable: Vec<&Operation> = ops.iter().filter(|op| op.undone).collect();
        let can_undo = ops.iter().any(|op| !op.is_checkpoint() && !op.undone);

        if redoable.is_empty() {
            return Ok(StepOutcome::nothing("Nothing to redo", can_undo, false));
        }
        if count == 0 {
            return Ok(StepOutcome::nothing("Nothing to redo", can_undo, true));
        }

        let take = count.min(redoable.len());
        // Oldest first
        let selected: Vec<&Operation> = redoable.iter().take(take).copied().collect();
        let seqs: Vec<u64> = selected.iter().map(|op| op.seq).collect();
        self.store.set_undone_many(session_id, &seqs, false)?;

        let mut steps = Vec::with_capacity(take);
        for op in selected {
            steps.push(EditStep {
                operation_id: op.id,
                seq: op.seq,
                apply: op.kind.clone(),
            });
            tracing::debug!(session_id, seq = op.seq, "operation redone");
        }

        Ok(StepOutcome {
            success: true,
            steps,
            can_undo: true,
            can_redo: redoable.len() > take,
            message: None,
        })
    }

    /// Reports the session's current undo/redo availability and last
    /// appended operation.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn status(&self, session_id: &str) -> Result<SessionStatus> {
        let ops = self.store.operations(session_id)?;
        Ok(SessionStatus {
            can_undo: ops.iter().any(|op| !op.is_checkpoint() && !op.undone),
            can_redo: ops.iter().any(|op| op.undone),
            last_operation: ops.last().map(|op| op.kind.name()),
            last_seq: ops.last().map(|op| op.seq),
        })
    }
}
