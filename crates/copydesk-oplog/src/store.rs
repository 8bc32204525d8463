//! Durable append-only operation store backed by redb.
//!
//! Uses a single redb database file with two tables:
//! - `operations`: bincode-serialized `Operation` entries keyed by
//!   `"{session_id}#{seq:020}"`
//! - `session_meta`: per-session metadata keyed by `session_id`
//!
//! Sequence assignment happens inside the write transaction that persists
//! the operation, so same-session appends serialize and numbers come out
//! strictly increasing and gapless.
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::operation::{Operation, OperationDraft};

/// Operations table: composite string key → bincode-serialized Operation.
const OPS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("operations");

/// Metadata table: session_id → bincode-serialized SessionMeta.
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("session_meta");

/// Per-session metadata persisted alongside the operation log.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct SessionMeta {
    last_seq: u64,
}

/// Formats an operations table key from session_id and sequence number.
///
/// The sequence number is zero-padded to 20 digits to ensure correct
/// lexicographic ordering in the B-tree.
fn op_key(session_id: &str, seq: u64) -> String {
    format!("{session_id}#{seq:020}")
}

/// Returns the exclusive range bounds for all operations of a session.
///
/// Uses `#` as separator and `$` (one ASCII codepoint above `#`) as the
/// exclusive upper bound.
fn session_range(session_id: &str) -> (String, String) {
    let start = format!("{session_id}#");
    let end = format!("{session_id}$");
    (start, end)
}

/// Append-only record of edit operations, keyed by editing session.
///
/// Thread-safe: redb supports concurrent readers and serialized writers.
/// Shared across sessions via `Arc<OperationStore>`.
pub struct OperationStore {
    db: Database,
}

impl std::fmt::Debug for OperationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationStore").finish()
    }
}

impl OperationStore {
    /// Opens or creates the operation database in the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened.
    pub fn open(data_dir: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("oplog.redb");
        let db = Database::create(&db_path).with_context(|| {
            format!("Failed to open operation database: {}", db_path.display())
        })?;

        // Ensure tables exist
        let write_txn = db
            .begin_write()
            .context("Failed to begin initial write transaction")?;
        {
            let _ = write_txn
                .open_table(OPS_TABLE)
                .context("Failed to create operations table")?;
            let _ = write_txn
                .open_table(META_TABLE)
                .context("Failed to create session meta table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initial transaction")?;

        Ok(Arc::new(Self { db }))
    }

    /// Appends an operation, assigning its id, sequence number, and commit
    /// time inside a single write transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; the operation must then
    /// be treated as not recorded.
    pub fn append(&self, draft: &OperationDraft) -> Result<Operation> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;

        let op = {
            let mut meta_table = write_txn
                .open_table(META_TABLE)
                .context("Failed to open session meta table")?;
            let last_seq = match meta_table
                .get(draft.session_id.as_str())
                .context("Failed to read session meta")?
            {
                Some(guard) => {
                    let meta: SessionMeta = bincode::deserialize(guard.value())
                        .context("Failed to deserialize session meta")?;
                    meta.last_seq
                }
                None => 0,
            };
            let seq = last_seq + 1;

            let op = Operation {
                id: Uuid::new_v4(),
                session_id: draft.session_id.clone(),
                assignment_id: draft.assignment_id.clone(),
                content_type: draft.content_type,
                content_id: draft.content_id.clone(),
                user_id: draft.user_id.clone(),
                seq,
                kind: draft.kind.clone(),
                undone: false,
                committed_at: Utc::now(),
            };

            let mut ops_table = write_txn
                .open_table(OPS_TABLE)
                .context("Failed to open operations table")?;
            let key = op_key(&op.session_id, seq);
            let bytes = bincode::serialize(&op).context("Failed to serialize operation")?;
            ops_table
                .insert(key.as_str(), bytes.as_slice())
                .context("Failed to insert operation")?;

            let meta = SessionMeta { last_seq: seq };
            let meta_bytes =
                bincode::serialize(&meta).context("Failed to serialize session meta")?;
            meta_table
                .insert(draft.session_id.as_str(), meta_bytes.as_slice())
                .context("Failed to update session meta")?;
            op
        };

        write_txn
            .commit()
            .context("Failed to commit write transaction")?;
        Ok(op)
    }

    /// Reads all operations for a session, ordered by sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction or deserialization fails.
    pub fn operations(&self, session_id: &str) -> Result<Vec<Operation>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(OPS_TABLE)
            .context("Failed to open operations table")?;

        let (start, end) = session_range(session_id);
        let mut ops = Vec::new();

        for entry in table
            .range::<&str>(start.as_str()..end.as_str())
            .context("Failed to range query operations table")?
        {
            let (_, value_guard) = entry.context("Failed to read operation entry")?;
            let op: Operation = bincode::deserialize(value_guard.value())
                .context("Failed to deserialize operation")?;
            ops.push(op);
        }

        Ok(ops)
    }

    /// Returns the last assigned sequence number for a session, or `None`
    /// if the session has never appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction fails.
    pub fn last_seq(&self, session_id: &str) -> Result<Option<u64>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(META_TABLE)
            .context("Failed to open session meta table")?;

        match table
            .get(session_id)
            .context("Failed to read session meta")?
        {
            Some(guard) => {
                let meta: SessionMeta = bincode::deserialize(guard.value())
                    .context("Failed to deserialize session meta")?;
                Ok(Some(meta.last_seq))
            }
            None => Ok(None),
        }
    }

    /// Flips the undone flag on a stored operation.
    ///
    /// The operation itself is never deleted by undo; marking keeps it
    /// redoable.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation does not exist or the write fails.
    pub fn set_undone(&self, session_id: &str, seq: u64, undone: bool) -> Result<()> {
        self.set_undone_many(session_id, &[seq], undone).map(|_| ())
    }

    /// Flips the undone flag on a batch of operations in one write
    /// transaction.
    ///
    /// All-or-nothing: if any operation is missing or any write fails, the
    /// transaction is dropped uncommitted and no flag changes.
    ///
    /// # Errors
    ///
    /// Returns an error if any operation does not exist or the transaction
    /// fails; in either case every flag keeps its previous value.
    pub fn set_undone_many(&self, session_id: &str, seqs: &[u64], undone: bool) -> Result<usize> {
        if seqs.is_empty() {
            return Ok(0);
        }

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(OPS_TABLE)
                .context("Failed to open operations table")?;
            for seq in seqs {
                let key = op_key(session_id, *seq);

                let mut op: Operation = match table
                    .get(key.as_str())
                    .context("Failed to read operation")?
                {
                    Some(guard) => bincode::deserialize(guard.value())
                        .context("Failed to deserialize operation")?,
                    // Dropping write_txn aborts it; no earlier flip survives
                    None => return Err(anyhow!("operation {session_id}/{seq} not found")),
                };
                op.undone = undone;

                let bytes = bincode::serialize(&op).context("Failed to serialize operation")?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .context("Failed to update operation")?;
            }
        }
        write_txn
            .commit()
            .context("Failed to commit undone flag update")?;
        Ok(seqs.len())
    }

    /// Whether the session has at least one operation that can be undone.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn has_undoable(&self, session_id: &str) -> Result<bool> {
        let ops = self.operations(session_id)?;
        Ok(ops.iter().any(|op| !op.is_checkpoint() && !op.undone))
    }

    /// Whether the session has at least one undone operation to redo.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn has_redoable(&self, session_id: &str) -> Result<bool> {
        let ops = self.operations(session_id)?;
        Ok(ops.iter().any(|op| op.undone))
    }

    /// Counts the operations stored for a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction fails.
    pub fn count(&self, session_id: &str) -> Result<usize> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(OPS_TABLE)
            .context("Failed to open operations table")?;

        let (start, end) = session_range(session_id);
        let count = table
            .range::<&str>(start.as_str()..end.as_str())
            .context("Failed to range query for count")?
            .count();

        Ok(count)
    }

    /// Sequence number of the session's most recent checkpoint, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn latest_checkpoint_seq(&self, session_id: &str) -> Result<Option<u64>> {
        let ops = self.operations(session_id)?;
        Ok(ops
            .iter()
            .rev()
            .find(|op| op.is_checkpoint())
            .map(|op| op.seq))
    }

    /// Removes the given operations from a session's log.
    ///
    /// Only the retention compactor calls this; undo never deletes.
    ///
    /// # Errors
    ///
    /// Returns an error if the write transaction fails.
    pub fn remove(&self, session_id: &str, seqs: &[u64]) -> Result<usize> {
        if seqs.is_empty() {
            return Ok(0);
        }

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let mut removed = 0;
        {
            let mut table = write_txn
                .open_table(OPS_TABLE)
                .context("Failed to open operations table")?;
            for seq in seqs {
                let key = op_key(session_id, *seq);
                if table
                    .remove(key.as_str())
                    .context("Failed to remove operation")?
                    .is_some()
                {
                    removed += 1;
                }
            }
        }
        write_txn.commit().context("Failed to commit removal")?;
        Ok(removed)
    }

    /// Operations on `content_id` committed by *other* sessions after
    /// `since`, ordered by commit time then sequence number.
    ///
    /// Used by the conflict resolver to build the concurrent set for an
    /// incoming operation's baseline window. Undone operations and
    /// checkpoints carry no net positional effect and are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction fails.
    pub fn concurrent_operations(
        &self,
        content_id: &str,
        exclude_session: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Operation>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(OPS_TABLE)
            .context("Failed to open operations table")?;

        let mut ops = Vec::new();
        for entry in table.iter().context("Failed to iterate operations table")? {
            let (_, value_guard) = entry.context("Failed to read operation entry")?;
            let op: Operation = bincode::deserialize(value_guard.value())
                .context("Failed to deserialize operation")?;
            if op.content_id == content_id
                && op.session_id != exclude_session
                && op.committed_at > since
                && !op.undone
                && !op.is_checkpoint()
            {
                ops.push(op);
            }
        }
        ops.sort_by(|a, b| {
            a.committed_at
                .cmp(&b.committed_at)
                .then(a.seq.cmp(&b.seq))
        });
        Ok(ops)
    }

    /// Lists all session IDs that have stored metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction fails.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(META_TABLE)
            .context("Failed to open session meta table")?;

        let mut session_ids = Vec::new();
        for entry in table.iter().context("Failed to iterate meta table")? {
            let (key_guard, _) = entry.context("Failed to read meta entry")?;
            session_ids.push(key_guard.value().to_string());
        }
        Ok(session_ids)
    }
}
