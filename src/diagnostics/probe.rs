//! # Best-effort diagnostic probes.
//!
//! Before a process is asked to terminate, the supervisor samples what it is doing
//! with a few local commands. A [`Prober`] runs one [`ProbeCommand`]; every outcome,
//! good or bad, is only ever logged.
//!
//! ```text
//! kill_probes(pid, install_path)
//!   timeout 3 strace -p <pid>                      syscall activity sample
//!   ps --pid  <pid> -o pid -o ppid -o cmd          the process itself
//!   ps --ppid <pid> -o pid -o ppid -o cmd          its children
//!   pgrep -a -f <install path>                     everything started from the install dir
//! ```

use std::fmt;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::diagnostics::{CrashReporter, LogSink};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One local command to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeCommand {
    /// Executable (resolved through `PATH`).
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Hard upper bound on the command's runtime.
    pub timeout: Duration,
}

impl ProbeCommand {
    /// Creates a command with the default 5s timeout.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Overrides the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for ProbeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a probe that ran.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeOutput {
    /// Exit status, `None` if the command was killed by a signal.
    pub status: Option<i32>,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// Failure to run a probe.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The command could not be started or its output collected.
    #[error("probe `{command}` failed to run: {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The command outlived its timeout and was killed.
    #[error("probe `{command}` timed out after {timeout:?}")]
    TimedOut {
        /// Rendered command line.
        command: String,
        /// Configured timeout.
        timeout: Duration,
    },
}

impl ProbeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProbeError::Spawn { .. } => "probe_spawn",
            ProbeError::TimedOut { .. } => "probe_timed_out",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// Runs diagnostic commands.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Runs `command` to completion (or until its timeout).
    async fn probe(&self, command: &ProbeCommand) -> Result<ProbeOutput, ProbeError>;
}

/// Shared handle to a prober.
pub type ProberRef = Arc<dyn Prober>;

/// Runs probes as local child processes via `tokio::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalProber;

#[async_trait]
impl Prober for LocalProber {
    async fn probe(&self, command: &ProbeCommand) -> Result<ProbeOutput, ProbeError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(command.timeout, cmd.output())
            .await
            .map_err(|_| ProbeError::TimedOut {
                command: command.to_string(),
                timeout: command.timeout,
            })?
            .map_err(|source| ProbeError::Spawn {
                command: command.to_string(),
                source,
            })?;

        Ok(ProbeOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Standard probe set run before terminating `pid`.
///
/// The `pgrep` probe is only included when `install_path` is known.
pub fn kill_probes(pid: i32, install_path: Option<&Path>) -> Vec<ProbeCommand> {
    let pid = pid.to_string();
    let mut probes = vec![
        ProbeCommand::new("timeout", ["3", "strace", "-p", pid.as_str()]),
        ProbeCommand::new("ps", ["--pid", pid.as_str(), "-o", "pid", "-o", "ppid", "-o", "cmd"]),
        ProbeCommand::new("ps", ["--ppid", pid.as_str(), "-o", "pid", "-o", "ppid", "-o", "cmd"]),
    ];
    if let Some(path) = install_path {
        probes.push(ProbeCommand::new(
            "pgrep",
            ["-a".to_owned(), "-f".to_owned(), path.display().to_string()],
        ));
    }
    probes
}

/// Runs `probes` sequentially: output goes to `sink`, failures to `crash`.
pub(crate) async fn run_probes(
    prober: &dyn Prober,
    crash: &dyn CrashReporter,
    sink: &dyn LogSink,
    probes: &[ProbeCommand],
) {
    for command in probes {
        match prober.probe(command).await {
            Ok(out) => {
                let mut text = format!("$ {command} (status {:?})\n", out.status);
                text.push_str(&out.stdout);
                if !out.stderr.is_empty() {
                    text.push_str(&out.stderr);
                }
                sink.write(&text);
            }
            Err(err) => crash.report(&format!("diagnostic probe `{command}`"), &err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
        reports: Mutex<Vec<String>>,
    }

    impl LogSink for Recorder {
        fn write(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_owned());
        }
    }

    impl CrashReporter for Recorder {
        fn report(&self, context: &str, _detail: &str) {
            self.reports.lock().unwrap().push(context.to_owned());
        }
    }

    struct Scripted;

    #[async_trait]
    impl Prober for Scripted {
        async fn probe(&self, command: &ProbeCommand) -> Result<ProbeOutput, ProbeError> {
            if command.program == "ps" {
                Ok(ProbeOutput {
                    status: Some(0),
                    stdout: "PID PPID CMD\n".into(),
                    stderr: String::new(),
                })
            } else {
                Err(ProbeError::TimedOut {
                    command: command.to_string(),
                    timeout: command.timeout,
                })
            }
        }
    }

    #[test]
    fn standard_probe_set() {
        let probes = kill_probes(42, Some(Path::new("/opt/app")));
        let rendered: Vec<String> = probes.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "timeout 3 strace -p 42",
                "ps --pid 42 -o pid -o ppid -o cmd",
                "ps --ppid 42 -o pid -o ppid -o cmd",
                "pgrep -a -f /opt/app",
            ]
        );
        assert_eq!(kill_probes(42, None).len(), 3);
    }

    #[tokio::test]
    async fn failures_go_to_crash_reporter() {
        let rec = Recorder::default();
        let probes = kill_probes(7, None);
        run_probes(&Scripted, &rec, &rec, &probes).await;

        assert_eq!(rec.lines.lock().unwrap().len(), 2);
        let reports = rec.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("strace"));
    }

    #[tokio::test]
    async fn local_prober_captures_output() {
        let out = LocalProber
            .probe(&ProbeCommand::new("echo", ["probe"]))
            .await
            .unwrap();
        assert_eq!(out.status, Some(0));
        assert_eq!(out.stdout.trim(), "probe");
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let err = LocalProber
            .probe(&ProbeCommand::new("procvisor-no-such-binary", Vec::<String>::new()))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "probe_spawn");
    }
}
