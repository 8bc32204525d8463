//! Retention compaction: bounds per-session storage growth.
//!
//! Compaction discards superseded non-checkpoint operations once a session
//! exceeds its operation budget. An operation is superseded only once a
//! later checkpoint snapshots its own content item; checkpoints themselves
//! are never removed, and an item with no checkpoint keeps all of its
//! operations. This keeps every content item a session touches
//! reconstructable, not just the one most recently snapshotted.
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::store::OperationStore;

/// Fraction of the operation budget kept after a compaction pass.
const RETAIN_NUMERATOR: usize = 4;
const RETAIN_DENOMINATOR: usize = 5;

/// Discards old non-checkpoint operations when a session's log exceeds
/// `max_operations`.
pub struct RetentionCompactor {
    max_operations: usize,
    store: Arc<OperationStore>,
}

impl RetentionCompactor {
    pub fn new(max_operations: usize, store: Arc<OperationStore>) -> Self {
        Self {
            max_operations,
            store,
        }
    }

    /// Runs one compaction pass for a session; idempotent.
    ///
    /// If the session holds more than `max_operations` operations, deletes
    /// every non-checkpoint operation older than the cutoff at 80% of the
    /// budget from the end, provided a later checkpoint for the same
    /// content item has superseded it. Operations on items without a
    /// checkpoint are never removed. Returns the number of operations
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or the removal fails.
    pub fn compact(&self, session_id: &str) -> Result<usize> {
        let ops = self.store.operations(session_id)?;
        if ops.len() <= self.max_operations {
            return Ok(0);
        }

        let keep = (self.max_operations * RETAIN_NUMERATOR / RETAIN_DENOMINATOR).max(1);
        let cutoff_seq = ops[ops.len() - keep].seq;

        // Latest checkpoint per content item. A session may interleave
        // edits to several items; each item's history is only superseded
        // by a snapshot of that item.
        let mut latest_checkpoints: HashMap<&str, u64> = HashMap::new();
        for op in ops.iter().filter(|op| op.is_checkpoint()) {
            latest_checkpoints.insert(op.content_id.as_str(), op.seq);
        }

        let doomed: Vec<u64> = ops
            .iter()
            .filter(|op| !op.is_checkpoint())
            .filter(|op| op.seq < cutoff_seq)
            .filter(|op| {
                latest_checkpoints
                    .get(op.content_id.as_str())
                    .map_or(false, |cp| op.seq < *cp)
            })
            .map(|op| op.seq)
            .collect();

        let removed = self.store.remove(session_id, &doomed)?;
        if removed > 0 {
            tracing::debug!(session_id, removed, cutoff_seq, "compacted session log");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationDraft, OperationKind};
    use chrono::Utc;
    use copydesk_content::ContentType;
    use tempfile::TempDir;

    fn setup(max_operations: usize) -> (Arc<OperationStore>, RetentionCompactor, TempDir) {
        let dir = TempDir::new().expect("create temp dir");
        let store = OperationStore::open(dir.path()).expect("open store");
        let compactor = RetentionCompactor::new(max_operations, Arc::clone(&store));
        (store, compactor, dir)
    }

    fn append(store: &OperationStore, content_id: &str, kind: OperationKind) {
        store
            .append(&OperationDraft {
                session_id: "s1".to_string(),
                assignment_id: "assign-1".to_string(),
                content_type: ContentType::ContentBlock,
                content_id: content_id.to_string(),
                user_id: "user-1".to_string(),
                kind,
                baseline: Utc::now(),
                expected_seq: None,
            })
            .expect("append");
    }

    fn insert(pos: usize) -> OperationKind {
        OperationKind::Insert {
            pos,
            text: "x".to_string(),
        }
    }

    fn checkpoint() -> OperationKind {
        OperationKind::Checkpoint {
            content: "snapshot".to_string(),
        }
    }

    #[test]
    fn test_under_budget_is_untouched() {
        let (store, compactor, _dir) = setup(10);
        for i in 0..10 {
            append(&store, "block-1", insert(i));
        }
        assert_eq!(compactor.compact("s1").expect("compact"), 0);
        assert_eq!(store.count("s1").expect("count"), 10);
    }

    #[test]
    fn test_over_budget_trims_to_retention_share() {
        let (store, compactor, _dir) = setup(10);
        for i in 0..12 {
            append(&store, "block-1", insert(i));
        }
        append(&store, "block-1", checkpoint()); // seq 13
        for i in 0..3 {
            append(&store, "block-1", insert(i));
        }

        let removed = compactor.compact("s1").expect("compact");
        assert_eq!(removed, 8);
        // The newest 80% of the budget survives
        assert_eq!(store.count("s1").expect("count"), 8);
        let ops = store.operations("s1").expect("read");
        assert_eq!(ops[0].seq, 9);
        assert_eq!(ops.last().expect("last").seq, 16);
    }

    #[test]
    fn test_items_without_a_checkpoint_keep_all_operations() {
        let (store, compactor, _dir) = setup(10);
        append(&store, "block-b", insert(0)); // seq 1, never checkpointed
        for i in 0..10 {
            append(&store, "block-1", insert(i));
        }
        append(&store, "block-1", checkpoint()); // seq 12
        for i in 0..3 {
            append(&store, "block-1", insert(i));
        }

        let removed = compactor.compact("s1").expect("compact");
        assert_eq!(removed, 6);

        let ops = store.operations("s1").expect("read");
        let seqs: Vec<u64> = ops.iter().map(|op| op.seq).collect();
        // block-b has no checkpoint, so its lone operation is still needed
        assert!(seqs.contains(&1), "un-checkpointed item lost its history");
        // block-1 operations below its checkpoint and the cutoff are gone
        for seq in 2..=7 {
            assert!(!seqs.contains(&seq));
        }
    }

    #[test]
    fn test_checkpoint_and_everything_after_survive() {
        let (store, compactor, _dir) = setup(10);
        for i in 0..3 {
            append(&store, "block-1", insert(i));
        }
        append(&store, "block-1", checkpoint()); // seq 4
        for i in 0..11 {
            append(&store, "block-1", insert(i));
        }

        compactor.compact("s1").expect("compact");

        let ops = store.operations("s1").expect("read");
        let seqs: Vec<u64> = ops.iter().map(|op| op.seq).collect();
        // Everything at or after the checkpoint (seq 4) is still present
        for seq in 4..=15 {
            assert!(seqs.contains(&seq), "seq {seq} missing after compaction");
        }
        // Operations before the checkpoint were eligible and removed
        assert!(!seqs.contains(&1));
    }

    #[test]
    fn test_old_checkpoints_are_never_removed() {
        let (store, compactor, _dir) = setup(6);
        append(&store, "block-1", checkpoint()); // seq 1, superseded later
        for i in 0..4 {
            append(&store, "block-1", insert(i));
        }
        append(&store, "block-1", checkpoint()); // seq 6, latest
        for i in 0..5 {
            append(&store, "block-1", insert(i));
        }

        compactor.compact("s1").expect("compact");

        let ops = store.operations("s1").expect("read");
        let checkpoint_seqs: Vec<u64> = ops
            .iter()
            .filter(|op| op.is_checkpoint())
            .map(|op| op.seq)
            .collect();
        assert_eq!(checkpoint_seqs, vec![1, 6]);
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let (store, compactor, _dir) = setup(10);
        for i in 0..12 {
            append(&store, "block-1", insert(i));
        }
        append(&store, "block-1", checkpoint()); // seq 13
        for i in 0..2 {
            append(&store, "block-1", insert(i));
        }

        let first = compactor.compact("s1").expect("compact");
        assert!(first > 0);
        let second = compactor.compact("s1").expect("compact");
        assert_eq!(second, 0);
    }
}
