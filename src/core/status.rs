/// Lifecycle of one `join` invocation.
///
/// ```text
/// Idle ──join()──► Working ──► Done      (every process exited, no forced kill)
///                          └─► Killed    (timeout or kill_all)
/// kill_all() forces Killed from any state.
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PoolStatus {
    /// `join` has not been called.
    #[default]
    Idle,
    /// `join` is running.
    Working,
    /// `join` finished without forcing any kill.
    Done,
    /// At least one process was killed by timeout or `kill_all`.
    Killed,
}

impl PoolStatus {
    /// Returns a short stable label for logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolStatus::Idle => "idle",
            PoolStatus::Working => "working",
            PoolStatus::Done => "done",
            PoolStatus::Killed => "killed",
        }
    }
}
