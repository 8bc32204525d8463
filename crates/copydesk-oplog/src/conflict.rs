//! Position transforms against concurrently committed operations.
//!
//! This is a position-shift transform only: it keeps an incoming edit's
//! intent when another session edited an earlier part of the same content
//! item, but it does not resolve true overlapping-range conflicts. Those
//! degrade to last-committed-wins, with the losing edit still recorded for
//! audit and a warning attached to the append receipt.
use uuid::Uuid;

use crate::operation::{Operation, OperationKind};

/// Raised when a concurrent operation's range overlaps the incoming one.
///
/// Non-fatal: the append proceeds with last-committed-wins positioning.
#[derive(Debug, Clone)]
pub struct ConflictWarning {
    /// The already-committed operation the incoming edit collided with.
    pub concurrent_id: Uuid,
    /// Session that committed the concurrent operation.
    pub concurrent_session: String,
    /// Incoming operation's range at the time of the collision.
    pub incoming_span: (usize, usize),
    /// Concurrent operation's range.
    pub concurrent_span: (usize, usize),
}

impl std::fmt::Display for ConflictWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "overlapping edit from session {}: incoming [{}, {}) vs concurrent [{}, {})",
            self.concurrent_session,
            self.incoming_span.0,
            self.incoming_span.1,
            self.concurrent_span.0,
            self.concurrent_span.1
        )
    }
}

/// Transforms incoming operations against concurrent ones.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Shifts `incoming` past every concurrent operation that committed
    /// entirely before its range, in commit order.
    ///
    /// `concurrent` must already be filtered to other-session operations on
    /// the same content item committed inside the baseline window, sorted
    /// by commit order (the store's `concurrent_operations` does both).
    ///
    /// Overlapping ranges are not transformed; each produces a
    /// `ConflictWarning` and the incoming position stands as-is.
    pub fn transform(
        incoming: &OperationKind,
        concurrent: &[Operation],
    ) -> (OperationKind, Vec<ConflictWarning>) {
        let mut transformed = incoming.clone();
        let mut warnings = Vec::new();

        for other in concurrent {
            let (in_start, in_end) = transformed.span();
            let (c_start, c_end) = other.kind.span();

            if c_end <= in_start {
                // Concurrent edit landed entirely before ours: shift by its
                // net length change.
                transformed = transformed.shifted(other.kind.len_delta());
            } else if c_start >= in_end {
                // Entirely after ours: no positional effect.
            } else {
                warnings.push(ConflictWarning {
                    concurrent_id: other.id,
                    concurrent_session: other.session_id.clone(),
                    incoming_span: (in_start, in_end),
                    concurrent_span: (c_start, c_end),
                });
            }
        }

        (transformed, warnings)
    }
}
