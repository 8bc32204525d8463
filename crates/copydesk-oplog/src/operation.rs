//! Core types for recorded edit operations.
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use copydesk_content::ContentType;

/// The payload of one content mutation.
///
/// All positions are character offsets in the coordinate space *before*
/// the operation executes. `Delete` carries the removed text (not just a
/// length) so its inverse can be derived without consulting the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Inserts `text` at `pos`.
    Insert { pos: usize, text: String },
    /// Removes `text` starting at `pos`.
    Delete { pos: usize, text: String },
    /// Replaces `old` with `new` starting at `pos`.
    Replace { pos: usize, old: String, new: String },
    /// Toggles the formatting attribute `attr` over `len` characters at `pos`.
    ///
    /// Formatting lives in the editor's rich-text layer; it never changes
    /// the plain-text content this log reconstructs.
    Format {
        pos: usize,
        len: usize,
        attr: String,
        on: bool,
    },
    /// Full-content snapshot bounding how far back replay must go.
    Checkpoint { content: String },
}

impl OperationKind {
    /// Short name used in logs and session status payloads.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Insert { .. } => "insert",
            OperationKind::Delete { .. } => "delete",
            OperationKind::Replace { .. } => "replace",
            OperationKind::Format { .. } => "format",
            OperationKind::Checkpoint { .. } => "checkpoint",
        }
    }

    /// Half-open `[start, end)` character range this operation applies to,
    /// in pre-execution coordinates.
    pub fn span(&self) -> (usize, usize) {
        match self {
            OperationKind::Insert { pos, .. } => (*pos, *pos),
            OperationKind::Delete { pos, text } => (*pos, pos + text.chars().count()),
            OperationKind::Replace { pos, old, .. } => (*pos, pos + old.chars().count()),
            OperationKind::Format { pos, len, .. } => (*pos, pos + len),
            OperationKind::Checkpoint { .. } => (0, 0),
        }
    }

    /// Net character-length change this operation applies to the content.
    pub fn len_delta(&self) -> i64 {
        match self {
            OperationKind::Insert { text, .. } => text.chars().count() as i64,
            OperationKind::Delete { text, .. } => -(text.chars().count() as i64),
            OperationKind::Replace { old, new, .. } => {
                new.chars().count() as i64 - old.chars().count() as i64
            }
            OperationKind::Format { .. } | OperationKind::Checkpoint { .. } => 0,
        }
    }

    /// Text this operation removes (empty for pure inserts).
    pub fn content_before(&self) -> &str {
        match self {
            OperationKind::Insert { .. }
            | OperationKind::Format { .. }
            | OperationKind::Checkpoint { .. } => "",
            OperationKind::Delete { text, .. } => text,
            OperationKind::Replace { old, .. } => old,
        }
    }

    /// Text this operation produces (empty for pure deletes).
    pub fn content_after(&self) -> &str {
        match self {
            OperationKind::Insert { text, .. } => text,
            OperationKind::Delete { .. } | OperationKind::Format { .. } => "",
            OperationKind::Replace { new, .. } => new,
            OperationKind::Checkpoint { content } => content,
        }
    }

    /// Derives the operation that undoes this one.
    ///
    /// Checkpoints are never individually undone; inverting one yields the
    /// checkpoint itself (a full-content restore instruction).
    pub fn invert(&self) -> OperationKind {
        match self {
            OperationKind::Insert { pos, text } => OperationKind::Delete {
                pos: *pos,
                text: text.clone(),
            },
            OperationKind::Delete { pos, text } => OperationKind::Insert {
                pos: *pos,
                text: text.clone(),
            },
            OperationKind::Replace { pos, old, new } => OperationKind::Replace {
                pos: *pos,
                old: new.clone(),
                new: old.clone(),
            },
            OperationKind::Format {
                pos,
                len,
                attr,
                on,
            } => OperationKind::Format {
                pos: *pos,
                len: *len,
                attr: attr.clone(),
                on: !on,
            },
            OperationKind::Checkpoint { content } => OperationKind::Checkpoint {
                content: content.clone(),
            },
        }
    }

    /// Returns a copy with its position shifted by `delta` characters.
    ///
    /// Checkpoints have no position and are returned unchanged.
    pub fn shifted(&self, delta: i64) -> OperationKind {
        let shift = |pos: usize| -> usize {
            let moved = pos as i64 + delta;
            moved.max(0) as usize
        };
        match self {
            OperationKind::Insert { pos, text } => OperationKind::Insert {
                pos: shift(*pos),
                text: text.clone(),
            },
            OperationKind::Delete { pos, text } => OperationKind::Delete {
                pos: shift(*pos),
                text: text.clone(),
            },
            OperationKind::Replace { pos, old, new } => OperationKind::Replace {
                pos: shift(*pos),
                old: old.clone(),
                new: new.clone(),
            },
            OperationKind::Format {
                pos,
                len,
                attr,
                on,
            } => OperationKind::Format {
                pos: shift(*pos),
                len: *len,
                attr: attr.clone(),
                on: *on,
            },
            OperationKind::Checkpoint { content } => OperationKind::Checkpoint {
                content: content.clone(),
            },
        }
    }

    /// Applies this operation to `content`, returning the new content.
    ///
    /// Used by reconstruction reads and tests. Formats leave the plain
    /// text untouched; checkpoints replace it wholesale.
    ///
    /// # Errors
    ///
    /// Returns an error if the position is out of bounds or the recorded
    /// before-text does not match what is actually at that position.
    pub fn apply(&self, content: &str) -> Result<String> {
        match self {
            OperationKind::Insert { pos, text } => {
                let at = byte_offset(content, *pos)?;
                let mut out = String::with_capacity(content.len() + text.len());
                out.push_str(&content[..at]);
                out.push_str(text);
                out.push_str(&content[at..]);
                Ok(out)
            }
            OperationKind::Delete { pos, text } => splice(content, *pos, text, ""),
            OperationKind::Replace { pos, old, new } => splice(content, *pos, old, new),
            OperationKind::Format { .. } => Ok(content.to_string()),
            OperationKind::Checkpoint { content: snapshot } => Ok(snapshot.clone()),
        }
    }
}

/// Replaces `old` at character offset `pos` with `new`, verifying that
/// `old` is actually present there.
fn splice(content: &str, pos: usize, old: &str, new: &str) -> Result<String> {
    let start = byte_offset(content, pos)?;
    let end = byte_offset(content, pos + old.chars().count())?;
    if &content[start..end] != old {
        bail!(
            "content mismatch at position {pos}: expected {old:?}, found {:?}",
            &content[start..end]
        );
    }
    let mut out = String::with_capacity(content.len() - old.len() + new.len());
    out.push_str(&content[..start]);
    out.push_str(new);
    out.push_str(&content[end..]);
    Ok(out)
}

/// Converts a character offset into a byte offset into `content`.
fn byte_offset(content: &str, char_pos: usize) -> Result<usize> {
    if char_pos == 0 {
        return Ok(0);
    }
    let mut remaining = char_pos;
    for (at, _) in content.char_indices() {
        if remaining == 0 {
            return Ok(at);
        }
        remaining -= 1;
    }
    if remaining == 0 {
        return Ok(content.len());
    }
    bail!(
        "position {char_pos} is past the end of content ({} chars)",
        content.chars().count()
    )
}

/// One recorded content mutation, as persisted in the operation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Process-wide unique identifier, assigned at persistence time.
    pub id: Uuid,
    /// Editing session this operation belongs to.
    pub session_id: String,
    /// Campaign assignment the edited content belongs to.
    pub assignment_id: String,
    /// Which content collaborator owns the edited item.
    pub content_type: ContentType,
    /// The edited content item.
    pub content_id: String,
    /// Editor who performed the mutation.
    pub user_id: String,
    /// Strictly increasing, gapless within a session. Assigned atomically
    /// at append time; the core ordering invariant.
    pub seq: u64,
    /// The mutation payload.
    pub kind: OperationKind,
    /// Undone operations are never deleted, only marked, so they can be
    /// redone.
    pub undone: bool,
    /// Commit time, used only for cross-session conflict ordering.
    pub committed_at: DateTime<Utc>,
}

impl Operation {
    pub fn is_checkpoint(&self) -> bool {
        matches!(self.kind, OperationKind::Checkpoint { .. })
    }
}

/// Append input: everything the editor knows before the store assigns
/// identity, sequence number, and commit time.
#[derive(Debug, Clone)]
pub struct OperationDraft {
    pub session_id: String,
    pub assignment_id: String,
    pub content_type: ContentType,
    pub content_id: String,
    pub user_id: String,
    pub kind: OperationKind,
    /// When the client read the state this edit applies to. Concurrent
    /// operations committed after this instant are transformed against.
    pub baseline: DateTime<Utc>,
    /// Last sequence number the client has seen, if it wants desync
    /// detection. `None` skips the check.
    pub expected_seq: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_apply_and_invert() {
        let op = OperationKind::Insert {
            pos: 5,
            text: " world".to_string(),
        };
        let after = op.apply("Hello").expect("apply");
        assert_eq!(after, "Hello world");

        let back = op.invert().apply(&after).expect("invert apply");
        assert_eq!(back, "Hello");
    }

    #[test]
    fn test_delete_apply_and_invert() {
        let op = OperationKind::Delete {
            pos: 0,
            text: "Hi ".to_string(),
        };
        let after = op.apply("Hi there").expect("apply");
        assert_eq!(after, "there");

        let back = op.invert().apply(&after).expect("invert apply");
        assert_eq!(back, "Hi there");
    }

    #[test]
    fn test_replace_apply_and_invert() {
        let op = OperationKind::Replace {
            pos: 4,
            old: "draft".to_string(),
            new: "final".to_string(),
        };
        let after = op.apply("The draft copy").expect("apply");
        assert_eq!(after, "The final copy");

        let back = op.invert().apply(&after).expect("invert apply");
        assert_eq!(back, "The draft copy");
    }

    #[test]
    fn test_format_apply_is_noop_and_invert_flips_toggle() {
        let op = OperationKind::Format {
            pos: 0,
            len: 5,
            attr: "bold".to_string(),
            on: true,
        };
        assert_eq!(op.apply("Hello").expect("apply"), "Hello");

        match op.invert() {
            OperationKind::Format { on, attr, .. } => {
                assert!(!on);
                assert_eq!(attr, "bold");
            }
            other => panic!("unexpected inverse: {other:?}"),
        }
    }

    #[test]
    fn test_checkpoint_apply_replaces_content() {
        let op = OperationKind::Checkpoint {
            content: "snapshot".to_string(),
        };
        assert_eq!(op.apply("anything").expect("apply"), "snapshot");
    }

    #[test]
    fn test_apply_rejects_mismatched_before_text() {
        let op = OperationKind::Delete {
            pos: 0,
            text: "xyz".to_string(),
        };
        assert!(op.apply("abc def").is_err());
    }

    #[test]
    fn test_apply_rejects_out_of_bounds_position() {
        let op = OperationKind::Insert {
            pos: 10,
            text: "!".to_string(),
        };
        assert!(op.apply("short").is_err());
    }

    #[test]
    fn test_multibyte_positions_are_char_offsets() {
        let op = OperationKind::Insert {
            pos: 2,
            text: "X".to_string(),
        };
        assert_eq!(op.apply("héllo").expect("apply"), "héXllo");
    }

    #[test]
    fn test_span_and_len_delta() {
        let insert = OperationKind::Insert {
            pos: 5,
            text: "ab".to_string(),
        };
        assert_eq!(insert.span(), (5, 5));
        assert_eq!(insert.len_delta(), 2);

        let delete = OperationKind::Delete {
            pos: 3,
            text: "abcd".to_string(),
        };
        assert_eq!(delete.span(), (3, 7));
        assert_eq!(delete.len_delta(), -4);

        let replace = OperationKind::Replace {
            pos: 1,
            old: "ab".to_string(),
            new: "wxyz".to_string(),
        };
        assert_eq!(replace.span(), (1, 3));
        assert_eq!(replace.len_delta(), 2);
    }

    #[test]
    fn test_shifted_clamps_at_zero() {
        let op = OperationKind::Insert {
            pos: 2,
            text: "a".to_string(),
        };
        match op.shifted(-5) {
            OperationKind::Insert { pos, .. } => assert_eq!(pos, 0),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_content_before_after() {
        let replace = OperationKind::Replace {
            pos: 0,
            old: "old".to_string(),
            new: "new".to_string(),
        };
        assert_eq!(replace.content_before(), "old");
        assert_eq!(replace.content_after(), "new");

        let insert = OperationKind::Insert {
            pos: 0,
            text: "hi".to_string(),
        };
        assert_eq!(insert.content_before(), "");
        assert_eq!(insert.content_after(), "hi");
    }
}
