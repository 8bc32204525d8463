//! Periodic full-content checkpoints.
//!
//! A checkpoint bounds how far back a reconstruction must replay: at most
//! `checkpoint_interval` operations past the last snapshot. Checkpoint
//! creation must never fail the edit that triggered it; a failed snapshot
//! read is logged and retried at the next interval.
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use copydesk_content::ContentRegistry;

use crate::operation::{Operation, OperationDraft, OperationKind};
use crate::store::OperationStore;

/// Appends a full-content `Checkpoint` operation after every
/// `interval` non-checkpoint appends in a session.
pub struct CheckpointManager {
    interval: u64,
    store: Arc<OperationStore>,
    registry: Arc<ContentRegistry>,
}

impl CheckpointManager {
    pub fn new(interval: u64, store: Arc<OperationStore>, registry: Arc<ContentRegistry>) -> Self {
        Self {
            interval,
            store,
            registry,
        }
    }

    /// Checkpoints the triggering operation's content item if the session
    /// has accumulated `interval` operations since the last checkpoint.
    ///
    /// Returns the appended checkpoint, or `None` if the interval has not
    /// elapsed or the snapshot read failed (logged, not fatal).
    ///
    /// # Errors
    ///
    /// Returns an error only if the log itself cannot be read or the
    /// checkpoint append fails.
    pub fn maybe_checkpoint(&self, trigger: &Operation) -> Result<Option<Operation>> {
        let ops = self.store.operations(&trigger.session_id)?;
        let last_checkpoint = ops
            .iter()
            .rev()
            .find(|op| op.is_checkpoint())
            .map(|op| op.seq);
        let since = ops
            .iter()
            .filter(|op| !op.is_checkpoint())
            .filter(|op| last_checkpoint.map_or(true, |cp| op.seq > cp))
            .count() as u64;

        if since < self.interval {
            return Ok(None);
        }

        let content = match self
            .registry
            .current_content(trigger.content_type, &trigger.content_id)
        {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    session_id = %trigger.session_id,
                    content_id = %trigger.content_id,
                    "checkpoint snapshot read failed, will retry next interval: {e:#}"
                );
                return Ok(None);
            }
        };

        let checkpoint = self.store.append(&OperationDraft {
            session_id: trigger.session_id.clone(),
            assignment_id: trigger.assignment_id.clone(),
            content_type: trigger.content_type,
            content_id: trigger.content_id.clone(),
            user_id: trigger.user_id.clone(),
            kind: OperationKind::Checkpoint { content },
            baseline: Utc::now(),
            expected_seq: None,
        })?;

        tracing::debug!(
            session_id = %checkpoint.session_id,
            seq = checkpoint.seq,
            "checkpoint recorded"
        );
        Ok(Some(checkpoint))
    }
}
