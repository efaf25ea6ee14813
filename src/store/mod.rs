//! # Process status persistence.
//!
//! A [`ProcessStore`] receives one [`ProcessRecord`] upsert when a managed process
//! starts (`alive = true`) and one when it completes (`alive = false`). Upserts are
//! issued from inside the forked child, so implementations must be usable from a
//! freshly forked, single-threaded process (no async runtime, no parent-only state).
//!
//! [`JsonlStore`] is the bundled implementation: an append-only JSON-lines file.

mod jsonl;
mod record;

pub use jsonl::JsonlStore;
pub use record::ProcessRecord;

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Failure of a persistence operation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("store i/o failed: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded.
    #[error("store encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "store_io",
            StoreError::Encode(_) => "store_encode",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// Persistence collaborator.
pub trait ProcessStore: Send + Sync + 'static {
    /// Inserts or replaces the record keyed by `record.id`.
    fn upsert(&self, record: &ProcessRecord) -> Result<(), StoreError>;

    /// Flags the worker `worker_pid` as corrupted (registry key `<pid>_WORKER_CORRUPTED`).
    fn mark_worker_corrupted(&self, worker_pid: u32) -> Result<(), StoreError>;
}

/// Shared handle to a store.
pub type StoreRef = Arc<dyn ProcessStore>;

/// Registry key used by [`ProcessStore::mark_worker_corrupted`].
pub fn worker_corrupted_key(worker_pid: u32) -> String {
    format!("{worker_pid}_WORKER_CORRUPTED")
}
