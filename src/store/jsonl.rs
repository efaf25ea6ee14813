//! # JSON-lines store.
//!
//! Every upsert appends one line; reading back keeps the latest line per id.
//!
//! ```text
//! {"kind":"process","id":"a","alive":true,...}
//! {"kind":"process","id":"a","alive":false,"returnValue":3,...}
//! {"kind":"worker_corrupted","key":"4242_WORKER_CORRUPTED","pid":4242,"at":1700000000000}
//! ```

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shared::now_ms;
use crate::store::{ProcessRecord, ProcessStore, StoreError, worker_corrupted_key};

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Entry {
    Process(ProcessRecord),
    WorkerCorrupted { key: String, pid: u32, at: u64 },
}

/// Append-only JSON-lines file store.
#[derive(Clone, Debug)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    /// Creates a store backed by `path` (created on first write).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest record per process id, in order of first appearance.
    pub fn load(&self) -> Result<Vec<ProcessRecord>, StoreError> {
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, ProcessRecord> = HashMap::new();
        for entry in self.entries()? {
            if let Entry::Process(record) = entry {
                if !latest.contains_key(&record.id) {
                    order.push(record.id.clone());
                }
                latest.insert(record.id.clone(), record);
            }
        }
        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }

    /// Registry keys of workers flagged as corrupted.
    pub fn corrupted_workers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::WorkerCorrupted { key, .. } => Some(key),
                Entry::Process(_) => None,
            })
            .collect())
    }

    fn entries(&self) -> Result<Vec<Entry>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    fn append(&self, entry: &Entry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

impl ProcessStore for JsonlStore {
    fn upsert(&self, record: &ProcessRecord) -> Result<(), StoreError> {
        self.append(&Entry::Process(record.clone()))
    }

    fn mark_worker_corrupted(&self, worker_pid: u32) -> Result<(), StoreError> {
        self.append(&Entry::WorkerCorrupted {
            key: worker_corrupted_key(worker_pid),
            pid: worker_pid,
            at: now_ms(),
        })
    }
}
