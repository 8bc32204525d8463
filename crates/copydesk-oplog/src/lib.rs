//! Edit-operation log and undo/redo engine for campaign content editing.
//!
//! Every content mutation from an editor session is appended to a durable,
//! per-session operation log (redb on disk) with a strictly increasing,
//! gapless sequence number. Undo and redo walk an `undone` flag on stored
//! operations instead of deleting history, periodic checkpoints bound how
//! far reconstruction must replay, incoming edits are position-transformed
//! against concurrent edits from other sessions, and a retention compactor
//! keeps per-session storage bounded.
pub mod checkpoint;
pub mod compact;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod operation;
pub mod store;
pub mod undo_redo;

pub use checkpoint::CheckpointManager;
pub use compact::RetentionCompactor;
pub use config::{generate_session_id, EngineConfig};
pub use conflict::{ConflictResolver, ConflictWarning};
pub use engine::{AppendReceipt, EditLog, ResyncSnapshot};
pub use error::OplogError;
pub use operation::{Operation, OperationDraft, OperationKind};
pub use store::OperationStore;
pub use undo_redo::{EditStep, SessionStatus, StepOutcome, UndoRedoCoordinator};
