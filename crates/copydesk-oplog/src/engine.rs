//! The `EditLog` facade tying the components together.
//!
//! Appends flow through: sequence-conflict check → conflict transform →
//! store append → maintenance (checkpoint, then compaction). Maintenance
//! runs either inline (deterministic, the default) or on a background
//! worker thread signaled over a channel, so snapshot cost stays off the
//! editor's append latency.
//!
//! Requests for one session serialize through a per-session lock; requests
//! for different sessions proceed in parallel. That lock is the only
//! mutual-exclusion boundary above the store's own write transactions.
use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use uuid::Uuid;

use copydesk_content::ContentRegistry;

use crate::checkpoint::CheckpointManager;
use crate::compact::RetentionCompactor;
use crate::config::EngineConfig;
use crate::conflict::{ConflictResolver, ConflictWarning};
use crate::error::OplogError;
use crate::operation::{Operation, OperationDraft, OperationKind};
use crate::store::OperationStore;
use crate::undo_redo::{SessionStatus, StepOutcome, UndoRedoCoordinator};

/// What the editor gets back from a successful append.
#[derive(Debug, Clone)]
pub struct AppendReceipt {
    pub operation_id: Uuid,
    pub sequence_number: u64,
    pub can_undo: bool,
    pub can_redo: bool,
    /// Overlapping-range conflicts detected while transforming. The edit
    /// was still recorded; the warnings are for surfacing in the UI.
    pub warnings: Vec<ConflictWarning>,
}

/// Latest checkpoint plus everything after it, for client resync after a
/// sequence conflict.
#[derive(Debug, Clone)]
pub struct ResyncSnapshot {
    pub checkpoint: Option<Operation>,
    /// Operations with a sequence number above the checkpoint's (all
    /// operations if the session has no checkpoint yet), in order.
    pub operations: Vec<Operation>,
}

enum MaintenanceJob {
    Run(Operation),
    Shutdown,
}

struct MaintenanceHandle {
    tx: Sender<MaintenanceJob>,
    worker: Option<JoinHandle<()>>,
}

/// Edit-operation log and undo/redo engine for one database of sessions.
pub struct EditLog {
    store: Arc<OperationStore>,
    coordinator: UndoRedoCoordinator,
    checkpoints: Arc<CheckpointManager>,
    compactor: Arc<RetentionCompactor>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    maintenance: Option<MaintenanceHandle>,
}

impl std::fmt::Debug for EditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditLog")
            .field("background_maintenance", &self.maintenance.is_some())
            .finish()
    }
}

impl EditLog {
    /// Opens the engine with inline maintenance: checkpoints and compaction
    /// run synchronously after each append commits.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation database cannot be opened.
    pub fn open(config: EngineConfig, registry: Arc<ContentRegistry>) -> Result<Self, OplogError> {
        let store = OperationStore::open(&config.data_dir)?;
        let checkpoints = Arc::new(CheckpointManager::new(
            config.checkpoint_interval,
            Arc::clone(&store),
            registry,
        ));
        let compactor = Arc::new(RetentionCompactor::new(
            config.max_operations_per_session,
            Arc::clone(&store),
        ));
        Ok(Self {
            coordinator: UndoRedoCoordinator::new(Arc::clone(&store)),
            store,
            checkpoints,
            compactor,
            session_locks: Mutex::new(HashMap::new()),
            maintenance: None,
        })
    }

    /// Moves maintenance onto a background worker thread.
    ///
    /// Each committed append enqueues a job; the worker runs the checkpoint
    /// check and compaction off the editor's latency path. Worker failures
    /// are logged, never surfaced to editors.
    pub fn with_background_maintenance(mut self) -> Self {
        let (tx, rx) = mpsc::channel();
        let checkpoints = Arc::clone(&self.checkpoints);
        let compactor = Arc::clone(&self.compactor);

        let worker = std::thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    MaintenanceJob::Run(op) => run_maintenance(&checkpoints, &compactor, &op),
                    MaintenanceJob::Shutdown => break,
                }
            }
        });

        self.maintenance = Some(MaintenanceHandle {
            tx,
            worker: Some(worker),
        });
        self
    }

    /// Records a content mutation, transforming it against concurrent
    /// operations from other sessions first.
    ///
    /// # Errors
    ///
    /// - `OplogError::SequenceConflict` if the draft carries an
    ///   `expected_seq` that does not match the store; resync and retry.
    /// - `OplogError::Persistence` if the store fails; the operation must
    ///   then be treated as not recorded.
    pub fn append(&self, draft: OperationDraft) -> Result<AppendReceipt, OplogError> {
        let lock = self.session_lock(&draft.session_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(expected) = draft.expected_seq {
            let actual = self.store.last_seq(&draft.session_id)?.unwrap_or(0);
            if actual != expected {
                return Err(OplogError::SequenceConflict {
                    session_id: draft.session_id.clone(),
                    expected,
                    actual,
                });
            }
        }

        let concurrent =
            self.store
                .concurrent_operations(&draft.content_id, &draft.session_id, draft.baseline)?;
        let (kind, warnings) = ConflictResolver::transform(&draft.kind, &concurrent);
        for warning in &warnings {
            tracing::warn!(
                session_id = %draft.session_id,
                content_id = %draft.content_id,
                "unresolvable conflict, keeping last-committed-wins position: {warning}"
            );
        }

        let draft = OperationDraft { kind, ..draft };
        let op = self.store.append(&draft)?;
        tracing::debug!(
            session_id = %op.session_id,
            seq = op.seq,
            kind = op.kind.name(),
            "operation appended"
        );

        match &self.maintenance {
            Some(handle) => {
                // A send failure means the worker is gone; compaction will
                // catch up on the next inline opportunity.
                if handle.tx.send(MaintenanceJob::Run(op.clone())).is_err() {
                    tracing::warn!("maintenance worker unavailable, running inline");
                    run_maintenance(&self.checkpoints, &self.compactor, &op);
                }
            }
            None => run_maintenance(&self.checkpoints, &self.compactor, &op),
        }

        let can_redo = self.store.has_redoable(&op.session_id)?;
        Ok(AppendReceipt {
            operation_id: op.id,
            sequence_number: op.seq,
            can_undo: true,
            can_redo,
            warnings,
        })
    }

    /// Undoes the `count` most recent operations of a session.
    ///
    /// # Errors
    ///
    /// Returns `OplogError::Persistence` on storage failure. Nothing to
    /// undo is a `success = false` outcome.
    pub fn undo(&self, session_id: &str, count: usize) -> Result<StepOutcome, OplogError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.coordinator.undo(session_id, count)?)
    }

    /// Redoes the `count` oldest undone operations of a session.
    ///
    /// # Errors
    ///
    /// Returns `OplogError::Persistence` on storage failure.
    pub fn redo(&self, session_id: &str, count: usize) -> Result<StepOutcome, OplogError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.coordinator.redo(session_id, count)?)
    }

    /// Undo/redo availability and last operation, for UI controls.
    ///
    /// # Errors
    ///
    /// Returns `OplogError::Persistence` on storage failure.
    pub fn session_status(&self, session_id: &str) -> Result<SessionStatus, OplogError> {
        Ok(self.coordinator.status(session_id)?)
    }

    /// Latest checkpoint plus subsequent operations, for client resync.
    ///
    /// # Errors
    ///
    /// Returns `OplogError::Persistence` on storage failure.
    pub fn resync(&self, session_id: &str) -> Result<ResyncSnapshot, OplogError> {
        let ops = self.store.operations(session_id)?;
        let checkpoint = ops.iter().rev().find(|op| op.is_checkpoint()).cloned();
        let after = checkpoint.as_ref().map(|cp| cp.seq).unwrap_or(0);
        let operations = ops.into_iter().filter(|op| op.seq > after).collect();
        Ok(ResyncSnapshot {
            checkpoint,
            operations,
        })
    }

    /// Rebuilds a content item's current text from the session's log.
    ///
    /// Starts from the latest checkpoint for that item (empty if none) and
    /// replays every later non-undone operation on it in sequence order.
    ///
    /// # Errors
    ///
    /// Returns `OplogError::Persistence` if the log cannot be read or a
    /// recorded operation no longer applies cleanly.
    pub fn reconstruct(&self, session_id: &str, content_id: &str) -> Result<String, OplogError> {
        let ops = self.store.operations(session_id)?;
        let checkpoint = ops
            .iter()
            .rev()
            .find(|op| op.is_checkpoint() && op.content_id == content_id);

        let mut content = match checkpoint {
            Some(op) => match &op.kind {
                OperationKind::Checkpoint { content } => content.clone(),
                _ => String::new(),
            },
            None => String::new(),
        };
        let after = checkpoint.map(|op| op.seq).unwrap_or(0);

        for op in ops
            .iter()
            .filter(|op| op.seq > after)
            .filter(|op| op.content_id == content_id)
            .filter(|op| !op.is_checkpoint() && !op.undone)
        {
            content = op.kind.apply(&content)?;
        }
        Ok(content)
    }

    /// Direct read access to the store, for embedding applications.
    pub fn store(&self) -> &Arc<OperationStore> {
        &self.store
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

impl Drop for EditLog {
    fn drop(&mut self) {
        if let Some(handle) = &mut self.maintenance {
            let _ = handle.tx.send(MaintenanceJob::Shutdown);
            if let Some(worker) = handle.worker.take() {
                let _ = worker.join();
            }
        }
    }
}

/// One maintenance pass after an append: checkpoint check, then compaction.
///
/// Failures here never reach the editor; the triggering edit is already
/// committed.
fn run_maintenance(
    checkpoints: &CheckpointManager,
    compactor: &RetentionCompactor,
    op: &Operation,
) {
    if let Err(e) = checkpoints.maybe_checkpoint(op) {
        tracing::warn!(
            session_id = %op.session_id,
            "checkpoint pass failed: {e:#}"
        );
    }
    if let Err(e) = compactor.compact(&op.session_id) {
        tracing::warn!(
            session_id = %op.session_id,
            "compaction pass failed: {e:#}"
        );
    }
}
