//! # Failure escalation behaviors.
//!
//! A timed-out process is always killed and flagged, and a non-zero exit code is
//! always observable through [`ManagedProcess::exit_code`](crate::ManagedProcess::exit_code).
//! These behaviors only decide whether the pool **also** returns an error from
//! [`Pool::join`](crate::Pool::join).
//!
//! ```text
//! TimeoutBehavior::Ignore   → kill + flag, join returns Ok (unless exit codes say otherwise)
//! TimeoutBehavior::Error    → kill + flag, join returns PoolError::Timeout after the loop
//! ExitCodeBehavior::Ignore  → exit codes are not inspected
//! ExitCodeBehavior::Error   → first non-zero exit code → PoolError::NonZeroExit
//! ```
//!
//! Respawn-budget exhaustion and resource acquisition failures are fatal regardless.

/// What a process killed for exceeding its execution time means for `join`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutBehavior {
    /// The kill is recorded on the process only.
    Ignore,
    /// `join` returns [`PoolError::Timeout`](crate::PoolError::Timeout) (default).
    #[default]
    Error,
}

/// What a non-zero OS exit code means for `join`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExitCodeBehavior {
    /// Exit codes are not inspected.
    Ignore,
    /// `join` returns [`PoolError::NonZeroExit`](crate::PoolError::NonZeroExit) (default).
    #[default]
    Error,
}

impl TimeoutBehavior {
    /// True when a timeout must surface as an error.
    #[inline]
    pub fn is_error(self) -> bool {
        matches!(self, TimeoutBehavior::Error)
    }
}

impl ExitCodeBehavior {
    /// True when a non-zero exit code must surface as an error.
    #[inline]
    pub fn is_error(self) -> bool {
        matches!(self, ExitCodeBehavior::Error)
    }
}
