//! # Diagnostics collaborators.
//!
//! Everything a managed process needs to explain itself when it fails or hangs:
//!
//! - [`LogSink`] - per-process diagnostic output target ([`TracingSink`], [`FileSink`], closures)
//! - [`CrashReporter`] - receives captured failures ([`TracingCrashReporter`])
//! - [`Prober`] - runs best-effort local diagnostic commands ([`LocalProber`])
//! - [`StackDump`] - child-side dump handler plus parent-side dump request ([`SignalStackDump`])
//!
//! [`Diagnostics`] bundles one of each (except the sink, which is per process).
//!
//! ## Rules
//! - Probe failures are routed to the crash reporter and never interrupt a kill.
//! - A stack-dump request to a process that is already gone is not an error.

mod crash;
mod dump;
mod probe;
mod sink;

pub use crash::{CrashRef, CrashReporter, TracingCrashReporter};
pub use dump::{DumpRef, DumpTarget, SignalStackDump, StackDump};
pub use probe::{
    LocalProber, ProbeCommand, ProbeError, ProbeOutput, Prober, ProberRef, kill_probes,
};
pub use sink::{FileSink, LogSink, SinkRef, TracingSink};

pub(crate) use probe::run_probes;

use std::path::PathBuf;
use std::sync::Arc;

/// Collaborators shared by every process of a pool.
#[derive(Clone)]
pub struct Diagnostics {
    /// Failure reporter.
    pub crash: CrashRef,
    /// Local command runner used by `kill()`.
    pub prober: ProberRef,
    /// Stack-dump provider.
    pub dump: DumpRef,
    /// Directory whose processes are listed by the `pgrep` probe.
    ///
    /// `None` skips that probe.
    pub install_path: Option<PathBuf>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            crash: Arc::new(TracingCrashReporter),
            prober: Arc::new(LocalProber::default()),
            dump: Arc::new(SignalStackDump),
            install_path: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(PathBuf::from)),
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("install_path", &self.install_path)
            .finish_non_exhaustive()
    }
}
