//! Error types used by the pool, managed processes and the work they run.
//!
//! This module defines three main error enums:
//!
//! - [`PoolError`] — errors raised by the supervisor itself (admission, resource
//!   acquisition, and the aggregate failures returned from [`Pool::join`](crate::Pool::join)).
//! - [`TaskError`] — errors raised by work (and `on_finish` hooks) inside a managed process.
//! - [`ProcessError`] — OS-level failures while forking, signalling or reaping one process.
//!
//! All types provide `as_label` for logs/metrics. Aggregate pool failures also carry
//! a structured [`FaultCode`] pair.

use std::fmt;

use nix::errno::Errno;
use thiserror::Error;

/// Structured numeric fault code attached to aggregate pool failures.
///
/// `major` identifies the failure family, `minor` the subsystem that raised it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FaultCode {
    /// Failure family.
    pub major: u16,
    /// Raising subsystem.
    pub minor: u16,
}

impl FaultCode {
    /// Timeouts and respawn-budget exhaustion.
    pub const SUPERVISION: FaultCode = FaultCode {
        major: 0x0756,
        minor: 0x0A,
    };

    /// Non-zero exit codes.
    pub const EXIT_CODE: FaultCode = FaultCode {
        major: 0x0755,
        minor: 0x0A,
    };
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}/{:#04x}", self.major, self.minor)
    }
}

/// # Errors produced by the pool.
///
/// `ResourceAcquisition` and `RespawnExhausted` are always fatal. `Timeout` and
/// `NonZeroExit` are only returned when the matching behavior is set to `Error`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PoolError {
    /// The shared-state segment could not be mapped after bounded retry.
    #[error("shared-state segment unavailable after {attempts} attempts: {source}")]
    ResourceAcquisition {
        /// Number of allocation attempts made.
        attempts: u32,
        /// Last allocation error.
        #[source]
        source: Errno,
    },

    /// More stuck-before-start respawns than the budget allows.
    #[error("[{code}] max number of respawned processes ({budget}) exceeded; last stuck process: {id}")]
    RespawnExhausted {
        /// Fault code ([`FaultCode::SUPERVISION`]).
        code: FaultCode,
        /// Id of the process whose respawn broke the budget.
        id: String,
        /// Configured respawn budget.
        budget: u32,
    },

    /// At least one process exceeded its execution time.
    #[error("[{code}] error while multiprocessing (process timeout): {detail}")]
    Timeout {
        /// Fault code ([`FaultCode::SUPERVISION`]).
        code: FaultCode,
        /// Id of the (last) timed-out process.
        id: String,
        /// Diagnostic summary of that process.
        detail: String,
    },

    /// A finished process returned a non-zero exit code.
    #[error("[{code}] error in multiprocessing (non-zero exit code {exit_code} returned by {id}): {detail}")]
    NonZeroExit {
        /// Fault code ([`FaultCode::EXIT_CODE`]).
        code: FaultCode,
        /// Offending process id.
        id: String,
        /// Exit code (negative signal number for signal deaths).
        exit_code: i32,
        /// Diagnostic summary of that process.
        detail: String,
    },

    /// A process could not be spawned.
    #[error("failed to spawn process {id}: {source}")]
    Spawn {
        /// Process id.
        id: String,
        /// Underlying process error.
        #[source]
        source: ProcessError,
    },

    /// The id is already tracked, queued or killed in this pool.
    #[error("process id already used in this pool: {0}")]
    DuplicateId(String),

    /// No tracked process has this id.
    #[error("unknown process: {0}")]
    UnknownProcess(String),

    /// A freshly mapped shared-state segment had no free slot.
    #[error("shared-state segment exhausted ({slots} slots)")]
    SlotsExhausted {
        /// Segment capacity.
        slots: usize,
    },

    /// Signalling or reaping a process failed with something other than a kill race.
    #[error("failed to terminate process {id}: {source}")]
    Signal {
        /// Process id.
        id: String,
        /// Underlying process error.
        #[source]
        source: ProcessError,
    },

    /// `join_until` was cancelled; every alive process was killed.
    #[error("join aborted; all processes killed")]
    Aborted,
}

impl PoolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::PoolError;
    ///
    /// let err = PoolError::DuplicateId("job-1".into());
    /// assert_eq!(err.as_label(), "pool_duplicate_id");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::ResourceAcquisition { .. } => "pool_resource_acquisition",
            PoolError::RespawnExhausted { .. } => "pool_respawn_exhausted",
            PoolError::Timeout { .. } => "pool_timeout",
            PoolError::NonZeroExit { .. } => "pool_non_zero_exit",
            PoolError::Spawn { .. } => "pool_spawn",
            PoolError::DuplicateId(_) => "pool_duplicate_id",
            PoolError::UnknownProcess(_) => "pool_unknown_process",
            PoolError::SlotsExhausted { .. } => "pool_slots_exhausted",
            PoolError::Signal { .. } => "pool_signal",
            PoolError::Aborted => "pool_aborted",
        }
    }

    /// Returns the structured fault code of aggregate failures raised by `join`.
    pub fn fault_code(&self) -> Option<FaultCode> {
        match self {
            PoolError::RespawnExhausted { code, .. }
            | PoolError::Timeout { code, .. }
            | PoolError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the id of the process the error is about, if any.
    pub fn process_id(&self) -> Option<&str> {
        match self {
            PoolError::RespawnExhausted { id, .. }
            | PoolError::Timeout { id, .. }
            | PoolError::NonZeroExit { id, .. }
            | PoolError::Spawn { id, .. }
            | PoolError::Signal { id, .. }
            | PoolError::DuplicateId(id)
            | PoolError::UnknownProcess(id) => Some(id),
            _ => None,
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self.fault_code() {
            Some(code) => format!("{code}: {self}"),
            None => self.to_string(),
        }
    }
}

/// # Errors produced by work.
///
/// Raised inside the managed process. They never cross the process boundary as
/// values: the child records them, flags the process and exits with
/// [`TaskError::exit_code`].
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Work failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Work asks the process to exit with a specific status.
    #[error("exit requested with code {code}")]
    Exit {
        /// Requested OS exit code.
        code: i32,
    },

    /// Work panicked.
    #[error("panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl TaskError {
    /// Convenience constructor for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::TaskError;
    ///
    /// let err = TaskError::Exit { code: 3 };
    /// assert_eq!(err.as_label(), "task_exit");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Exit { .. } => "task_exit",
            TaskError::Panicked { .. } => "task_panicked",
        }
    }

    /// OS exit status the managed process terminates with.
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskError::Fail { .. } => 1,
            TaskError::Exit { code } => *code,
            TaskError::Panicked { .. } => 101,
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Fail { error } => error.clone(),
            other => other.to_string(),
        }
    }
}

/// # Errors produced while operating one OS process.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// `fork(2)` failed.
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),

    /// Sending a signal failed (never `ESRCH`, which is tolerated).
    #[error("signal {signal} to pid {pid} failed: {source}")]
    Signal {
        /// Target pid.
        pid: i32,
        /// Signal name.
        signal: &'static str,
        /// Underlying errno.
        #[source]
        source: Errno,
    },

    /// `waitpid(2)` failed.
    #[error("waitpid on pid {pid} failed: {source}")]
    Wait {
        /// Target pid.
        pid: i32,
        /// Underlying errno.
        #[source]
        source: Errno,
    },

    /// A private shared-state slot could not be allocated.
    #[error("shared-state slot unavailable: {0}")]
    Attach(#[source] Errno),
}

impl ProcessError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::Fork(_) => "process_fork",
            ProcessError::Signal { .. } => "process_signal",
            ProcessError::Wait { .. } => "process_wait",
            ProcessError::Attach(_) => "process_attach",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_codes_follow_failure_family() {
        let timeout = PoolError::Timeout {
            code: FaultCode::SUPERVISION,
            id: "a".into(),
            detail: "id: a".into(),
        };
        let exit = PoolError::NonZeroExit {
            code: FaultCode::EXIT_CODE,
            id: "b".into(),
            exit_code: 3,
            detail: "id: b".into(),
        };

        assert_eq!(timeout.fault_code(), Some(FaultCode::SUPERVISION));
        assert_eq!(exit.fault_code(), Some(FaultCode::EXIT_CODE));
        assert_eq!(PoolError::Aborted.fault_code(), None);
        assert_eq!(exit.process_id(), Some("b"));
        assert!(exit.to_string().contains("0x0755/0x0a"));
    }

    #[test]
    fn task_errors_map_to_exit_codes() {
        assert_eq!(TaskError::fail("boom").exit_code(), 1);
        assert_eq!(TaskError::Exit { code: 3 }.exit_code(), 3);
        assert_eq!(
            TaskError::Panicked {
                message: "oops".into()
            }
            .exit_code(),
            101
        );
    }
}
