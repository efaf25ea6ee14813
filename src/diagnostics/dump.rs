//! # Stack dumps of running processes.
//!
//! A [`StackDump`] has two halves that run in different processes:
//! - [`install`](StackDump::install) runs inside the forked child before the work starts;
//! - [`request`](StackDump::request) runs in the supervisor and asks a child to dump.
//!
//! [`SignalStackDump`] pairs a `SIGUSR2` handler with `kill(pid, SIGUSR2)`. The
//! handler writes the process identity, its work, arguments, time since start and
//! a backtrace of the interrupted thread to the process's [`LogSink`](crate::LogSink).

use std::backtrace::Backtrace;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

use crate::diagnostics::SinkRef;
use crate::error::ProcessError;

/// What a child reports about itself when asked to dump.
#[derive(Clone)]
pub struct DumpTarget {
    /// Managed process id.
    pub id: String,
    /// Work name.
    pub work: String,
    /// Rendered positional arguments.
    pub args: String,
    /// When the child started.
    pub started: Instant,
    /// Where the dump goes.
    pub sink: SinkRef,
}

impl DumpTarget {
    /// Renders the dump text (header plus `backtrace`).
    pub fn render(&self, backtrace: &Backtrace) -> String {
        format!(
            "DEBUG SIGNAL RECEIVED IN PROCESS {pid} (id: {id}, work: {work}, args: {args}, running for {elapsed:?})\nBACKTRACE:\n{backtrace}",
            pid = std::process::id(),
            id = self.id,
            work = self.work,
            args = self.args,
            elapsed = self.started.elapsed(),
        )
    }
}

/// Dumps the state of a running managed process on request.
pub trait StackDump: Send + Sync + 'static {
    /// Child side: prepares the current process to answer dump requests.
    fn install(&self, target: DumpTarget) -> Result<(), Errno>;

    /// Parent side: asks process `pid` to dump. A vanished process is not an error.
    fn request(&self, pid: Pid) -> Result<(), ProcessError>;
}

/// Shared handle to a stack-dump provider.
pub type DumpRef = Arc<dyn StackDump>;

/// `SIGUSR2`-based stack dumps.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignalStackDump;

static TARGET: Mutex<Option<DumpTarget>> = Mutex::new(None);

// Runs on whatever thread the signal interrupts. Not async-signal-safe; it is a
// last-resort view into a hung child and skips the dump if the target is locked.
extern "C" fn on_dump_signal(_: std::ffi::c_int) {
    let Ok(guard) = TARGET.try_lock() else {
        return;
    };
    if let Some(target) = guard.as_ref() {
        target.sink.write(&target.render(&Backtrace::force_capture()));
    }
}

impl StackDump for SignalStackDump {
    fn install(&self, target: DumpTarget) -> Result<(), Errno> {
        match TARGET.lock() {
            Ok(mut slot) => *slot = Some(target),
            Err(poisoned) => *poisoned.into_inner() = Some(target),
        }
        let action = SigAction::new(
            SigHandler::Handler(on_dump_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        // SAFETY: the handler only touches the static target through `try_lock`.
        unsafe { signal::sigaction(Signal::SIGUSR2, &action) }.map(|_| ())
    }

    fn request(&self, pid: Pid) -> Result<(), ProcessError> {
        match signal::kill(pid, Signal::SIGUSR2) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::Signal {
                pid: pid.as_raw(),
                signal: "SIGUSR2",
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::FileSink;
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::{ForkResult, fork};

    use crate::process::exit_now;
    use serial_test::serial;
    use std::time::Duration;

    #[test]
    fn render_names_the_process() {
        let target = DumpTarget {
            id: "job-1".into(),
            work: "sleep".into(),
            args: "[5]".into(),
            started: Instant::now(),
            sink: Arc::new(|_: &str| {}),
        };
        let text = target.render(&Backtrace::disabled());
        assert!(text.contains("id: job-1"));
        assert!(text.contains("work: sleep"));
        assert!(text.contains("args: [5]"));
    }

    #[test]
    #[serial]
    fn request_to_vanished_pid_is_tolerated() {
        // SAFETY: the child exits immediately.
        let child = match unsafe { fork() }.unwrap() {
            ForkResult::Child => exit_now(0),
            ForkResult::Parent { child } => child,
        };
        waitpid(child, None).unwrap();
        assert!(SignalStackDump.request(child).is_ok());
    }

    #[test]
    #[serial]
    fn child_dumps_to_its_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.log");
        let sink = FileSink::new(&path);

        // SAFETY: the child installs the handler, idles until signalled, then `_exit`s.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let target = DumpTarget {
                    id: "hung".into(),
                    work: "spin".into(),
                    args: "[]".into(),
                    started: Instant::now(),
                    sink: Arc::new(sink),
                };
                if SignalStackDump.install(target).is_err() {
                    exit_now(2);
                }
                std::thread::sleep(Duration::from_secs(2));
                exit_now(0);
            }
            ForkResult::Parent { child } => {
                std::thread::sleep(Duration::from_millis(300));
                SignalStackDump.request(child).unwrap();
                assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));

                let text = std::fs::read_to_string(&path).unwrap();
                assert!(text.contains("DEBUG SIGNAL RECEIVED"));
                assert!(text.contains("id: hung"));
            }
        }
    }
}
