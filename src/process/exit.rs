use nix::sys::wait::WaitStatus;

/// How a reaped process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitState {
    /// Normal exit with a status code.
    Exited(i32),
    /// Terminated by a signal (signal number).
    Signaled(i32),
    /// Reaped by someone else; the status is unknown.
    Lost,
}

impl ExitState {
    /// Exit code convention: `code` for normal exits, `-signal` for signal deaths.
    pub fn code(self) -> Option<i32> {
        match self {
            ExitState::Exited(code) => Some(code),
            ExitState::Signaled(sig) => Some(-sig),
            ExitState::Lost => None,
        }
    }

    /// Whether the process exited normally with status 0.
    pub fn success(self) -> bool {
        self == ExitState::Exited(0)
    }

    /// Maps a `waitpid` status; `None` while the process still exists.
    pub(crate) fn from_wait(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitState::Exited(code)),
            WaitStatus::Signaled(_, sig, _) => Some(ExitState::Signaled(sig as i32)),
            _ => None,
        }
    }
}
