//! # ManagedProcess: one unit of work bound to one OS process.
//!
//! Construction is pure; nothing runs until [`ManagedProcess::start`] forks.
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use procvisor::{ManagedProcess, TaskError, WorkFn};
//! use serde_json::{json, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let work = WorkFn::arc("double", |args: &Vec<Value>| {
//!     let n = args.first().and_then(Value::as_i64).unwrap_or_default();
//!     Ok::<_, TaskError>(json!(n * 2))
//! });
//!
//! let mut p = ManagedProcess::new(work, vec![json!(21)])
//!     .with_id("double-21")
//!     .with_max_execution_time(Duration::from_secs(10));
//!
//! p.start()?;
//! assert!(p.wait_timeout(Duration::from_secs(5)).await);
//! assert_eq!(p.return_value(), Some(json!(42)));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use serde_json::Value;

use crate::diagnostics::{FileSink, SinkRef, TracingSink, kill_probes, run_probes};
use crate::error::ProcessError;
use crate::process::context::ProcessContext;
use crate::process::{ExitState, child};
use crate::shared::{Arena, Slot};
use crate::store::{ProcessRecord, StoreRef};
use crate::tasks::{Args, WorkRef};

/// Handle to one managed OS process.
pub struct ManagedProcess {
    id: String,
    name: Option<String>,
    work: WorkRef,
    args: Args,
    max_execution_time: Option<Duration>,
    join_timeout: Option<Duration>,
    dump_wait: Option<Duration>,
    sink: SinkRef,
    log_file: Option<PathBuf>,
    on_finish: Option<(WorkRef, Args)>,
    persist: bool,

    pub(crate) ctx: ProcessContext,
    slot: Option<Slot>,
    pid: Option<Pid>,
    dispatched_at: Option<Instant>,
    exit: Mutex<Option<ExitState>>,
}

impl ManagedProcess {
    /// Creates an idle process running `work(args)`, with a generated id, no time
    /// limit and the [`TracingSink`].
    pub fn new(work: WorkRef, args: Args) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: None,
            work,
            args,
            max_execution_time: None,
            join_timeout: None,
            dump_wait: None,
            sink: Arc::new(TracingSink),
            log_file: None,
            on_finish: None,
            persist: false,
            ctx: ProcessContext::default(),
            slot: None,
            pid: None,
            dispatched_at: None,
            exit: Mutex::new(None),
        }
    }

    /// Sets the process id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.set_id(id);
        self
    }

    /// Sets a display name (defaults to the id).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    /// Bounds the execution time once the work is running.
    pub fn with_max_execution_time(mut self, max: Duration) -> Self {
        self.set_max_execution_time(Some(max));
        self
    }

    /// Sets the diagnostic sink.
    pub fn with_log_sink(mut self, sink: SinkRef) -> Self {
        self.set_log_sink(sink);
        self
    }

    /// Logs diagnostics to `path` (a [`FileSink`]) and reports it in persisted records.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.set_log_file(path);
        self
    }

    /// Runs `hook(args)` in the child after the work succeeded.
    pub fn with_on_finish(mut self, hook: WorkRef, args: Args) -> Self {
        self.set_on_finish(hook, args);
        self
    }

    /// Overrides the cooperative-exit grace period.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.set_join_timeout(timeout);
        self
    }

    /// Overrides the pause between the stack-dump request and `SIGTERM`.
    pub fn with_dump_wait(mut self, wait: Duration) -> Self {
        self.dump_wait = Some(wait);
        self
    }

    /// Enables or disables status persistence through the pool's store.
    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.set_persistence(enabled);
        self
    }

    /// Persists through `store` (used when the process runs outside a pool).
    pub fn with_store(mut self, store: StoreRef) -> Self {
        self.ctx.store = Some(store);
        self.persist = true;
        self
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn set_args(&mut self, args: Args) {
        self.args = args;
    }

    /// `None` means unlimited.
    pub fn set_max_execution_time(&mut self, max: Option<Duration>) {
        self.max_execution_time = max;
    }

    /// Signed-seconds form: any negative value means unlimited.
    pub fn set_max_execution_secs(&mut self, secs: i64) {
        self.max_execution_time = u64::try_from(secs).ok().map(Duration::from_secs);
    }

    pub fn set_join_timeout(&mut self, timeout: Duration) {
        self.join_timeout = Some(timeout);
    }

    pub fn set_log_sink(&mut self, sink: SinkRef) {
        self.sink = sink;
    }

    pub fn set_log_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.sink = Arc::new(FileSink::new(path.clone()));
        self.log_file = Some(path);
    }

    pub fn set_on_finish(&mut self, hook: WorkRef, args: Args) {
        self.on_finish = Some((hook, args));
    }

    pub fn set_persistence(&mut self, enabled: bool) {
        self.persist = enabled;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name; follows the id unless set explicitly.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn work(&self) -> &WorkRef {
        &self.work
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn max_execution_time(&self) -> Option<Duration> {
        self.max_execution_time
    }

    /// Execution bound in signed seconds, `-1` for unlimited.
    pub fn max_execution_secs(&self) -> i64 {
        self.max_execution_time
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(-1)
    }

    /// Effective cooperative-exit grace period.
    pub fn join_timeout(&self) -> Duration {
        self.join_timeout.unwrap_or(self.ctx.join_timeout)
    }

    /// Effective pause between the stack-dump request and `SIGTERM`.
    pub fn dump_wait(&self) -> Duration {
        self.dump_wait.unwrap_or(self.ctx.dump_wait)
    }

    pub fn log_sink(&self) -> &SinkRef {
        &self.sink
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn on_finish(&self) -> Option<&(WorkRef, Args)> {
        self.on_finish.as_ref()
    }

    pub fn persistence(&self) -> bool {
        self.persist
    }

    /// OS pid once started.
    pub fn pid(&self) -> Option<i32> {
        self.pid.map(Pid::as_raw)
    }

    /// Whether `start` has forked the process.
    pub fn is_started(&self) -> bool {
        self.pid.is_some()
    }

    /// Whether the work has begun executing (set by the child, stays set afterwards).
    pub fn is_running(&self) -> bool {
        self.slot.as_ref().is_some_and(Slot::is_running)
    }

    /// Whether the process has been flagged as failed.
    pub fn has_error(&self) -> bool {
        self.slot.as_ref().is_some_and(Slot::has_error)
    }

    /// Start of execution.
    pub fn start_time(&self) -> Option<SystemTime> {
        self.slot.as_ref().and_then(Slot::start_ms).map(from_ms)
    }

    /// End of execution (natural, or stamped by the supervisor).
    pub fn end_time(&self) -> Option<SystemTime> {
        self.slot.as_ref().and_then(Slot::end_ms).map(from_ms)
    }

    /// Time since `start` forked the process.
    pub fn since_dispatch(&self) -> Option<Duration> {
        self.dispatched_at.map(|at| at.elapsed())
    }

    /// Wall time since the work began executing.
    pub fn running_for(&self) -> Option<Duration> {
        self.start_time()
            .map(|start| SystemTime::now().duration_since(start).unwrap_or_default())
    }

    /// Return value, readable once the process is no longer alive.
    pub fn return_value(&self) -> Option<Value> {
        if self.is_alive() {
            return None;
        }
        self.slot.as_ref().and_then(Slot::read_return)
    }

    /// Reaped exit state, if the process has exited.
    pub fn exit_state(&self) -> Option<ExitState> {
        self.poll_exit().ok().flatten()
    }

    /// OS exit code (`-signal` for signal deaths), if the process has exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_state().and_then(ExitState::code)
    }

    /// Whether the process was started and has not exited yet.
    pub fn is_alive(&self) -> bool {
        self.pid.is_some() && matches!(self.poll_exit(), Ok(None))
    }

    /// Attaches a slot of the pool's arena (before `start`).
    pub(crate) fn attach(&mut self, slot: Slot) {
        self.slot = Some(slot);
    }

    pub(crate) fn slot(&self) -> Option<&Slot> {
        self.slot.as_ref()
    }

    /// Forks the process. Calling it again after a successful start returns the same pid.
    pub fn start(&mut self) -> Result<i32, ProcessError> {
        if let Some(pid) = self.pid {
            return Ok(pid.as_raw());
        }
        let slot = match self.slot.clone() {
            Some(slot) => slot,
            None => {
                let arena = Arc::new(
                    Arena::map(1, self.ctx.slot_capacity).map_err(ProcessError::Attach)?,
                );
                let slot = arena.slot().ok_or(ProcessError::Attach(Errno::ENOMEM))?;
                self.slot = Some(slot.clone());
                slot
            }
        };

        // SAFETY: the child only runs synchronous work and leaves through `_exit`,
        // never returning into the caller's runtime.
        match unsafe { fork() }.map_err(ProcessError::Fork)? {
            ForkResult::Child => child::run(self, &slot),
            ForkResult::Parent { child } => {
                self.pid = Some(child);
                self.dispatched_at = Some(Instant::now());
                tracing::debug!(target: "procvisor.process", id = %self.id, pid = child.as_raw(), "process forked");
                Ok(child.as_raw())
            }
        }
    }

    /// Polls `waitpid(WNOHANG)`; the first observed exit is cached.
    pub(crate) fn poll_exit(&self) -> Result<Option<ExitState>, ProcessError> {
        let mut cached = lock(&self.exit);
        if cached.is_some() {
            return Ok(*cached);
        }
        let Some(pid) = self.pid else {
            return Ok(None);
        };
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => {
                *cached = ExitState::from_wait(status);
                Ok(*cached)
            }
            Err(Errno::ECHILD) => {
                *cached = Some(ExitState::Lost);
                Ok(*cached)
            }
            Err(source) => Err(ProcessError::Wait {
                pid: pid.as_raw(),
                source,
            }),
        }
    }

    /// Bounded cooperative wait. Returns `true` once the process is no longer alive.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(self.ctx.poll_interval.min(deadline - now)).await;
        }
    }

    /// Escalating termination request.
    ///
    /// Runs the diagnostic probes, asks the process to dump its stack, waits
    /// [`dump_wait`](Self::dump_wait) and sends `SIGTERM`. Probe and dump failures are
    /// only reported. No-op for a process that is not alive.
    pub async fn kill(&self) -> Result<(), ProcessError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        if !self.is_alive() {
            return Ok(());
        }

        let diag = &self.ctx.diagnostics;
        let summary = self.describe();
        self.sink.write(&format!("Send it SIGTERM to ({summary})"));

        let probes = kill_probes(pid.as_raw(), diag.install_path.as_deref());
        run_probes(
            diag.prober.as_ref(),
            diag.crash.as_ref(),
            self.sink.as_ref(),
            &probes,
        )
        .await;
        diag.crash
            .report(&format!("terminating process {}", self.id), &summary);

        if let Err(err) = diag.dump.request(pid) {
            diag.crash
                .report(&format!("stack dump request for {}", self.id), &err.to_string());
        }
        tokio::time::sleep(self.dump_wait()).await;

        self.signal(Signal::SIGTERM, "SIGTERM")
    }

    /// Sends `SIGKILL`. A vanished process is not an error.
    pub(crate) fn hard_kill(&self) -> Result<(), ProcessError> {
        self.signal(Signal::SIGKILL, "SIGKILL")
    }

    fn signal(&self, sig: Signal, name: &'static str) -> Result<(), ProcessError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        if self.exit_state().is_some() {
            return Ok(());
        }
        match signal::kill(pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::Signal {
                pid: pid.as_raw(),
                signal: name,
                source,
            }),
        }
    }

    /// Stamps the end time unless one is set. Returns `true` if this call set it.
    pub(crate) fn stamp_end(&self) -> bool {
        self.slot.as_ref().is_some_and(Slot::mark_ended)
    }

    pub(crate) fn flag_error(&self) {
        if let Some(slot) = &self.slot {
            slot.set_error(true);
        }
    }

    /// One-line diagnostic summary.
    pub fn describe(&self) -> String {
        self.describe_as(self.pid())
    }

    pub(crate) fn describe_as(&self, pid: Option<i32>) -> String {
        let ms = |v: Option<u64>| v.map_or_else(|| "None".to_owned(), |ms| ms.to_string());
        format!(
            "id: {}, start_time: {}, end_time: {}, max_time: {}, work: {}, args: {}, pid: {}, is_running: {}",
            self.id,
            ms(self.slot.as_ref().and_then(Slot::start_ms)),
            ms(self.slot.as_ref().and_then(Slot::end_ms)),
            self.max_execution_secs(),
            self.work.name(),
            Value::Array(self.args.clone()),
            pid.map_or_else(|| "None".to_owned(), |p| p.to_string()),
            if self.is_running() { "True" } else { "False" },
        )
    }

    /// Fresh, unstarted copy under `new_id`: same work, args, limits, sink, log
    /// file, hook and persistence. A name that followed the old id follows the new one.
    pub fn respawn_as(&self, new_id: impl Into<String>) -> Self {
        Self {
            id: new_id.into(),
            name: self.name.clone(),
            work: Arc::clone(&self.work),
            args: self.args.clone(),
            max_execution_time: self.max_execution_time,
            join_timeout: self.join_timeout,
            dump_wait: self.dump_wait,
            sink: Arc::clone(&self.sink),
            log_file: self.log_file.clone(),
            on_finish: self.on_finish.clone(),
            persist: self.persist,
            ctx: self.ctx.clone(),
            slot: None,
            pid: None,
            dispatched_at: None,
            exit: Mutex::new(None),
        }
    }

    /// Status snapshot for the persistence layer.
    pub(crate) fn record(&self, alive: bool) -> ProcessRecord {
        let slot = self.slot.as_ref();
        ProcessRecord {
            id: self.id.clone(),
            return_value: slot.and_then(Slot::read_return),
            name: self.name().to_owned(),
            alive,
            log_file: self.log_file.as_ref().map(|p| p.display().to_string()),
            start_time: slot.and_then(Slot::start_ms),
            end_time: slot.and_then(Slot::end_ms),
            max_execution_time: self.max_execution_secs(),
            args: self.args.clone(),
        }
    }

    /// Upserts the current status if persistence is enabled. Failures are reported.
    pub(crate) fn persist_state(&self, alive: bool) {
        if !self.persist {
            return;
        }
        let Some(store) = &self.ctx.store else {
            return;
        };
        if let Err(err) = store.upsert(&self.record(alive)) {
            self.ctx
                .diagnostics
                .crash
                .report(&format!("persisting process {}", self.id), &err.to_string());
        }
    }
}

fn from_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("work", &self.work.name())
            .field("pid", &self.pid())
            .field("max_execution_time", &self.max_execution_time)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{
        Diagnostics, DumpTarget, ProbeCommand, ProbeError, ProbeOutput, Prober, SignalStackDump,
        StackDump, TracingCrashReporter,
    };
    use crate::error::TaskError;
    use crate::store::JsonlStore;
    use crate::tasks::WorkFn;
    use async_trait::async_trait;
    use serde_json::json;
    use serial_test::serial;

    struct Quiet;

    #[async_trait]
    impl Prober for Quiet {
        async fn probe(&self, _command: &ProbeCommand) -> Result<ProbeOutput, ProbeError> {
            Ok(ProbeOutput::default())
        }
    }

    fn quiet(p: ManagedProcess) -> ManagedProcess {
        let mut p = p.with_dump_wait(Duration::from_millis(20));
        p.ctx.diagnostics = Diagnostics {
            crash: Arc::new(TracingCrashReporter),
            prober: Arc::new(Quiet),
            dump: Arc::new(SignalStackDump),
            install_path: None,
        };
        p
    }

    fn sleeper(secs: u64) -> WorkRef {
        WorkFn::arc("sleeper", move |_: &Args| {
            std::thread::sleep(Duration::from_secs(secs));
            Ok::<_, TaskError>(Value::Null)
        })
    }

    #[test]
    fn construction_is_pure() {
        let p = ManagedProcess::new(sleeper(1), vec![json!(1)]);
        assert!(!p.is_started());
        assert!(!p.is_alive());
        assert_eq!(p.name(), p.id());
        assert_eq!(p.max_execution_secs(), -1);
        assert_eq!(p.join_timeout(), Duration::from_secs(30));
        assert!(uuid::Uuid::parse_str(p.id()).is_ok());
    }

    #[test]
    fn signed_execution_time() {
        let mut p = ManagedProcess::new(sleeper(1), Vec::new());
        p.set_max_execution_secs(-1);
        assert_eq!(p.max_execution_time(), None);
        p.set_max_execution_secs(7);
        assert_eq!(p.max_execution_time(), Some(Duration::from_secs(7)));
        assert_eq!(p.max_execution_secs(), 7);
    }

    #[test]
    fn respawn_keeps_configuration() {
        let p = ManagedProcess::new(sleeper(1), vec![json!("a")])
            .with_id("job")
            .with_max_execution_time(Duration::from_secs(5))
            .with_persistence(true);
        let clone = p.respawn_as("job-1");
        assert_eq!(clone.id(), "job-1");
        assert_eq!(clone.name(), "job-1");
        assert_eq!(clone.args(), &vec![json!("a")]);
        assert_eq!(clone.max_execution_time(), Some(Duration::from_secs(5)));
        assert!(clone.persistence());
        assert!(!clone.is_started());

        let named = p.with_name("backup").respawn_as("job-2");
        assert_eq!(named.name(), "backup");
    }

    #[tokio::test]
    #[serial]
    async fn runs_and_returns_value() {
        let work = WorkFn::arc("sum", |args: &Args| {
            Ok::<_, TaskError>(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        });
        let mut p = ManagedProcess::new(work, vec![json!(2), json!(3)]);
        p.start().unwrap();

        assert!(p.wait_timeout(Duration::from_secs(10)).await);
        assert_eq!(p.exit_code(), Some(0));
        assert_eq!(p.return_value(), Some(json!(5)));
        assert!(p.is_running());
        assert!(!p.has_error());
        assert!(p.start_time().is_some());
        assert!(p.end_time().is_some());
    }

    #[tokio::test]
    #[serial]
    async fn failing_work_exits_nonzero_and_flags_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("proc.log");
        let work = WorkFn::arc("exit3", |_: &Args| Err::<Value, _>(TaskError::Exit { code: 3 }));
        let mut p = ManagedProcess::new(work, Vec::new())
            .with_id("exit3")
            .with_log_file(&log);
        p.start().unwrap();

        assert!(p.wait_timeout(Duration::from_secs(10)).await);
        assert_eq!(p.exit_code(), Some(3));
        assert!(p.has_error());
        assert_eq!(p.return_value(), None);

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("Failure on process: id: exit3"));
    }

    #[tokio::test]
    #[serial]
    async fn panicking_work_is_a_failure() {
        let work = WorkFn::arc("panics", |_: &Args| -> Result<Value, TaskError> { panic!("nope") });
        let mut p = ManagedProcess::new(work, Vec::new()).with_log_sink(Arc::new(|_: &str| {}));
        p.start().unwrap();

        assert!(p.wait_timeout(Duration::from_secs(10)).await);
        assert_eq!(p.exit_code(), Some(101));
        assert!(p.has_error());
    }

    #[tokio::test]
    #[serial]
    async fn on_finish_failure_keeps_return_value() {
        let work = WorkFn::arc("value", |_: &Args| Ok::<_, TaskError>(json!("kept")));
        let hook = WorkFn::arc("hook", |_: &Args| Err::<Value, _>(TaskError::fail("hook failed")));
        let mut p = ManagedProcess::new(work, Vec::new())
            .with_on_finish(hook, Vec::new())
            .with_log_sink(Arc::new(|_: &str| {}));
        p.start().unwrap();

        assert!(p.wait_timeout(Duration::from_secs(10)).await);
        assert_eq!(p.exit_code(), Some(1));
        assert!(p.has_error());
        assert_eq!(p.return_value(), Some(json!("kept")));
    }

    #[tokio::test]
    #[serial]
    async fn kill_terminates_and_is_idempotent() {
        let mut p = quiet(ManagedProcess::new(sleeper(30), Vec::new()));
        p.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(p.is_alive());

        p.kill().await.unwrap();
        assert!(p.wait_timeout(Duration::from_secs(10)).await);
        assert_eq!(p.exit_code(), Some(-15));

        p.kill().await.unwrap();
        assert!(!p.is_alive());
    }

    #[tokio::test]
    async fn kill_before_start_is_noop() {
        let p = ManagedProcess::new(sleeper(1), Vec::new());
        p.kill().await.unwrap();
        assert_eq!(p.exit_code(), None);
    }

    #[tokio::test]
    #[serial]
    async fn persistence_records_start_and_completion() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlStore::new(dir.path().join("procs.jsonl")));
        let work = WorkFn::arc("seven", |_: &Args| Ok::<_, TaskError>(json!(7)));
        let mut p = ManagedProcess::new(work, vec![json!("x")])
            .with_id("persisted")
            .with_store(store.clone());
        p.start().unwrap();
        assert!(p.wait_timeout(Duration::from_secs(10)).await);

        let records = store.load().unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.id, "persisted");
        assert!(!rec.alive);
        assert_eq!(rec.return_value, Some(json!(7)));
        assert_eq!(rec.max_execution_time, -1);
        assert!(rec.end_time.is_some());
    }

    struct Hang;

    impl StackDump for Hang {
        fn install(&self, _target: DumpTarget) -> Result<(), Errno> {
            loop {
                std::thread::sleep(Duration::from_secs(3600));
            }
        }

        fn request(&self, _pid: Pid) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    #[tokio::test]
    #[serial]
    async fn never_running_when_install_hangs() {
        let mut p = quiet(ManagedProcess::new(sleeper(1), Vec::new()));
        p.ctx.diagnostics.dump = Arc::new(Hang);
        p.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(p.is_alive());
        assert!(!p.is_running());
        p.kill().await.unwrap();
        assert!(p.wait_timeout(Duration::from_secs(10)).await);
        assert_eq!(p.exit_code(), Some(-15));
    }
}
