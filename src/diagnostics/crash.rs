//! # Crash reporting.

use std::backtrace::Backtrace;
use std::sync::Arc;

/// Receives captured failures: work errors inside a child, failed diagnostic
/// probes and the snapshot taken before a process is terminated.
pub trait CrashReporter: Send + Sync + 'static {
    /// Records one failure. `context` says what was happening, `detail` what went wrong.
    fn report(&self, context: &str, detail: &str);
}

/// Shared handle to a crash reporter.
pub type CrashRef = Arc<dyn CrashReporter>;

/// Logs every report at `error` level under `procvisor.crash`, with a backtrace
/// of the reporting thread (honors `RUST_BACKTRACE`).
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingCrashReporter;

impl CrashReporter for TracingCrashReporter {
    fn report(&self, context: &str, detail: &str) {
        let backtrace = Backtrace::capture();
        tracing::error!(
            target: "procvisor.crash",
            pid = std::process::id(),
            context,
            detail,
            backtrace = %backtrace,
            "crash report"
        );
    }
}
