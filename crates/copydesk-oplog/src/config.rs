//! Configuration for the operation log engine.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of successful appends between automatic full-content checkpoints.
const DEFAULT_CHECKPOINT_INTERVAL: u64 = 50;

/// Maximum operations kept per session before the retention compactor
/// discards superseded history.
const DEFAULT_MAX_OPERATIONS_PER_SESSION: usize = 1000;

/// Configuration for an `EditLog` instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Appends between automatic checkpoints.
    pub checkpoint_interval: u64,
    /// Max operations per session before compaction kicks in.
    pub max_operations_per_session: usize,
    /// Root directory for the operation database.
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            max_operations_per_session: DEFAULT_MAX_OPERATIONS_PER_SESSION,
            data_dir: resolve_data_dir(),
        }
    }
}

/// Resolves the data directory path.
///
/// Resolution order:
/// 1. `COPYDESK_DATA_DIR` environment variable
/// 2. `.data/` directory next to the executable
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("COPYDESK_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
    exe.parent().unwrap_or(Path::new(".")).join(".data")
}

/// Counter for generating unique session IDs within a process.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a unique session ID for a newly opened editor instance.
pub fn generate_session_id() -> String {
    let count = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("session-{count}")
}
