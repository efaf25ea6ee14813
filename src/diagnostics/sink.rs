//! # Diagnostic log sinks.
//!
//! A [`LogSink`] receives free-form diagnostic lines about one process: failure
//! notices, probe output, stack dumps. Sinks are invoked from the supervisor and
//! from inside the forked child, so a sink must not depend on state that only
//! exists in one of them.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Diagnostic output target.
pub trait LogSink: Send + Sync + 'static {
    /// Writes one (possibly multi-line) message.
    fn write(&self, line: &str);
}

/// Shared handle to a sink.
pub type SinkRef = Arc<dyn LogSink>;

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn write(&self, line: &str) {
        self(line)
    }
}

/// Default sink: forwards lines to `tracing` under `procvisor.child`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, line: &str) {
        tracing::info!(target: "procvisor.child", pid = std::process::id(), "{line}");
    }
}

/// Appends every message to a file.
///
/// The file is opened in append mode for each write, so writers in different
/// processes never share a file offset.
#[derive(Clone, Debug)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Creates a sink appending to `path` (created on first write).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        if !line.ends_with('\n') {
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
    }
}

impl LogSink for FileSink {
    fn write(&self, line: &str) {
        if let Err(err) = self.append(line) {
            tracing::warn!(target: "procvisor.child", path = %self.path.display(), error = %err, "log sink write failed");
        }
    }
}
