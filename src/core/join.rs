//! # The join loop.
//!
//! Runs until no tracked process is alive and the wait queue is empty:
//!
//! ```text
//! loop:
//!   drain wait queue while alive < limit
//!   for each tracked, not killed process:
//!     exited            → stamp end time, ProcessExited (once)
//!     never running and
//!       dispatched > stuck threshold → kill, drop, submit clone "<id>-<n>",
//!                                      n > respawn budget → RespawnExhausted
//!     running > max     → escalating kill, error = true, end time, status Killed
//!     otherwise         → bounded wait (join_timeout, ends early at any due deadline)
//! any error (respawn budget, failed dispatch, cancellation) → kill_all, then the error
//! after the loop:
//!   timeout under Error  → Timeout
//!   non-zero exit under Error → NonZeroExit (first offender)
//!   status Working → Done
//! ```
//!
//! Stuck detection uses the supervisor's monotonic clock from dispatch; execution
//! time uses the start time recorded by the child.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::core::pool::Pool;
use crate::core::status::PoolStatus;
use crate::error::{FaultCode, PoolError};
use crate::events::{Event, EventKind};

impl Pool {
    /// Supervises every submitted process until all have exited.
    ///
    /// Returns normally unless a fatal condition occurred (see [`PoolError`]);
    /// individual failures stay inspectable through the accessors.
    pub async fn join(&mut self) -> Result<(), PoolError> {
        self.join_until(CancellationToken::new()).await
    }

    /// Like [`join`](Self::join), but cancelling `cancel` kills every process and
    /// returns [`PoolError::Aborted`].
    pub async fn join_until(&mut self, cancel: CancellationToken) -> Result<(), PoolError> {
        self.ensure_listener();
        self.status = PoolStatus::Working;
        self.bus.publish(Event::new(EventKind::PoolWorking));

        match self.supervise(&cancel).await {
            Ok(timed_out) => self.finish(timed_out),
            Err(err) => {
                tracing::warn!(target: "procvisor.pool", error = %err, "join failed; killing all processes");
                if let Err(cleanup) = self.kill_all().await {
                    tracing::warn!(target: "procvisor.pool", error = %cleanup, "cleanup after failed join incomplete");
                }
                Err(err)
            }
        }
    }

    /// The supervision loop. Returns the id of a process whose timeout must be
    /// raised; any error leaves the remaining processes to the caller's cleanup.
    async fn supervise(&mut self, cancel: &CancellationToken) -> Result<Option<String>, PoolError> {
        let mut respawns: u32 = 0;
        let mut timed_out: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(PoolError::Aborted);
            }
            self.drain_queue()?;
            if self.alive_count() == 0 && self.admission.is_empty() {
                return Ok(timed_out);
            }

            let ids: Vec<String> = self
                .processes
                .iter()
                .filter(|p| !self.is_killed(p.id()))
                .map(|p| p.id().to_owned())
                .collect();

            for id in ids {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(idx) = self.index_of(&id) else {
                    continue;
                };
                let process = &self.processes[idx];

                if !process.is_alive() {
                    self.observe_exit(idx);
                    continue;
                }

                if !process.is_running() {
                    let threshold = self.cfg.stuck_threshold(process.max_execution_time());
                    if process.since_dispatch().is_some_and(|e| e > threshold) {
                        respawns += 1;
                        self.respawn(idx, respawns, threshold).await?;
                        continue;
                    }
                } else if let Some(max) = process.max_execution_time() {
                    if process.running_for().is_some_and(|r| r > max) {
                        self.expire(idx, max).await;
                        if self.timeout_behavior().is_error() {
                            timed_out = Some(id);
                        }
                        continue;
                    }
                }

                self.wait_bounded(idx, cancel).await;
            }
        }
    }

    /// Post-loop aggregation.
    fn finish(&mut self, timed_out: Option<String>) -> Result<(), PoolError> {
        for idx in 0..self.processes.len() {
            self.observe_exit(idx);
        }

        if let Some(id) = timed_out {
            let detail = self
                .process(&id)
                .map(|p| p.describe())
                .unwrap_or_else(|| format!("id: {id}"));
            return Err(PoolError::Timeout {
                code: FaultCode::SUPERVISION,
                id,
                detail,
            });
        }

        if self.exit_code_behavior().is_error() {
            let offender = self
                .processes
                .iter()
                .find_map(|p| p.exit_code().filter(|code| *code != 0).map(|code| (p, code)));
            if let Some((p, exit_code)) = offender {
                return Err(PoolError::NonZeroExit {
                    code: FaultCode::EXIT_CODE,
                    id: p.id().to_owned(),
                    exit_code,
                    detail: p.describe(),
                });
            }
        }

        if self.status == PoolStatus::Working {
            self.status = PoolStatus::Done;
            self.bus.publish(Event::new(EventKind::PoolDone));
        }
        Ok(())
    }

    /// Replaces the stuck process at `idx` with a clone, charging the respawn budget.
    async fn respawn(&mut self, idx: usize, n: u32, threshold: Duration) -> Result<(), PoolError> {
        let process = &self.processes[idx];
        let id = process.id().to_owned();
        let pid = process.pid().unwrap_or_default();
        tracing::warn!(target: "procvisor.pool", id = %id, pid, respawn = n, ?threshold, "process stuck before start");
        self.bus.publish(
            Event::new(EventKind::StuckDetected)
                .with_process(id.as_str())
                .with_pid(pid)
                .with_timeout(threshold),
        );

        let budget = self.cfg.respawn_budget;
        if n > budget {
            return Err(PoolError::RespawnExhausted {
                code: FaultCode::SUPERVISION,
                id,
                budget,
            });
        }

        if let Err(err) = self.terminate(idx).await {
            tracing::warn!(target: "procvisor.pool", id = %id, error = %err, "stuck process did not terminate cleanly");
        }
        let stuck = self.processes.remove(idx);
        stuck.stamp_end();

        let clone_id = format!("{id}-{n}");
        tracing::warn!(target: "procvisor.pool", destroyed = %id, created = %clone_id, "respawning stuck process");
        let clone = stuck.respawn_as(clone_id.as_str());
        self.submit(clone)?;

        let delay = self.cfg.respawn_backoff.next(n);
        self.bus.publish(
            Event::new(EventKind::ProcessRespawned)
                .with_process(clone_id)
                .with_reason(id)
                .with_attempt(n)
                .with_delay(delay),
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    /// Kills the process at `idx` for running past `max`.
    async fn expire(&mut self, idx: usize, max: Duration) {
        let process = &self.processes[idx];
        let id = process.id().to_owned();
        let pid = process.pid().unwrap_or_default();
        tracing::warn!(target: "procvisor.pool", id = %id, pid, ?max, "process exceeded its execution time");
        self.bus.publish(
            Event::new(EventKind::TimeoutHit)
                .with_process(id.as_str())
                .with_pid(pid)
                .with_timeout(max),
        );

        if let Err(err) = self.terminate(idx).await {
            tracing::warn!(target: "procvisor.pool", id = %id, error = %err, "timed-out process did not terminate cleanly");
        }

        let process = &self.processes[idx];
        process.stamp_end();
        process.flag_error();
        process
            .log_sink()
            .write(&format!("Timeout while async execute ({})", process.describe()));

        self.status = PoolStatus::Killed;
        self.bus.publish(
            Event::new(EventKind::PoolKilled).with_reason(format!("timeout: {id}")),
        );
    }

    /// Bounded cooperative wait on the process at `idx`.
    ///
    /// Returns when it exits, when the bound elapses, when a queued process could
    /// be dispatched, when any tracked process reaches its stuck or execution
    /// deadline, or on cancellation. Deadlines are re-evaluated on every poll so a
    /// process that starts running during the wait is still timed out on time.
    async fn wait_bounded(&self, idx: usize, cancel: &CancellationToken) {
        let process = &self.processes[idx];
        let poll = self.cfg.poll_interval.max(Duration::from_millis(1));
        let deadline = Instant::now() + process.join_timeout().max(poll);

        loop {
            if !process.is_alive() {
                return;
            }
            if !self.admission.is_empty() && self.admission.has_capacity(self.alive_count()) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let due = self.next_deadline().unwrap_or(Duration::MAX);
            if due.is_zero() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(poll.min(due).min(deadline - now)) => {}
            }
        }
    }

    /// Time until the nearest stuck-before-start or execution deadline.
    fn next_deadline(&self) -> Option<Duration> {
        self.processes
            .iter()
            .filter(|p| !self.is_killed(p.id()) && p.is_alive())
            .filter_map(|p| {
                if p.is_running() {
                    let max = p.max_execution_time()?;
                    Some(max.saturating_sub(p.running_for()?))
                } else {
                    let threshold = self.cfg.stuck_threshold(p.max_execution_time());
                    Some(threshold.saturating_sub(p.since_dispatch()?))
                }
            })
            .min()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use nix::errno::Errno;
    use nix::unistd::Pid;
    use serde_json::{Value, json};
    use serial_test::serial;
    use tokio_util::sync::CancellationToken;

    use crate::config::PoolConfig;
    use crate::core::{Pool, PoolStatus};
    use crate::diagnostics::{
        DumpTarget, ProbeCommand, ProbeError, ProbeOutput, Prober, StackDump,
    };
    use crate::error::{FaultCode, PoolError, ProcessError, TaskError};
    use crate::events::{Event, EventKind};
    use crate::policies::{BackoffPolicy, ExitCodeBehavior, TimeoutBehavior};
    use crate::process::ManagedProcess;
    use crate::store::JsonlStore;
    use crate::subscribers::Subscribe;
    use crate::tasks::{Args, WorkFn, WorkRef};

    struct Quiet;

    #[async_trait]
    impl Prober for Quiet {
        async fn probe(&self, _command: &ProbeCommand) -> Result<ProbeOutput, ProbeError> {
            Ok(ProbeOutput::default())
        }
    }

    /// Child never reaches `running`.
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

    /// Child reaches `running` only after a short delay.
    struct SlowStart;

    impl StackDump for SlowStart {
        fn install(&self, _target: DumpTarget) -> Result<(), Errno> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        }

        fn request(&self, _pid: Pid) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Kinds(std::sync::Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Kinds {
        async fn on_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.kind);
        }
    }

    fn config(limit: usize) -> PoolConfig {
        PoolConfig {
            limit,
            dump_wait: Duration::from_millis(20),
            join_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            arena_slots: 64,
            slot_capacity: 4096,
            ..PoolConfig::default()
        }
    }

    fn pool(cfg: PoolConfig, timeout: TimeoutBehavior, exit: ExitCodeBehavior) -> Pool {
        Pool::builder(cfg)
            .with_timeout_behavior(timeout)
            .with_exit_code_behavior(exit)
            .with_prober(Arc::new(Quiet))
            .with_install_path(None)
            .build()
            .unwrap()
    }

    fn echo() -> WorkRef {
        WorkFn::arc("echo", |args: &Args| {
            Ok::<_, TaskError>(args.first().cloned().unwrap_or(Value::Null))
        })
    }

    fn sleeper(ms: u64) -> WorkRef {
        WorkFn::arc("sleeper", move |_: &Args| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok::<_, TaskError>(json!("slept"))
        })
    }

    fn proc(work: WorkRef, id: &str, arg: Value) -> ManagedProcess {
        ManagedProcess::new(work, vec![arg]).with_id(id)
    }

    #[tokio::test]
    #[serial]
    async fn fast_processes_complete_under_limit() {
        let mut pool = pool(config(2), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        for n in 0..3 {
            pool.submit(proc(echo(), &format!("p{n}"), json!(n))).unwrap();
        }
        assert!(pool.alive_count() <= 2);

        pool.join().await.unwrap();

        assert_eq!(pool.status(), PoolStatus::Done);
        let values = pool.return_values();
        assert_eq!(values.len(), 3);
        assert_eq!(values["p0"], json!(0));
        assert_eq!(values["p2"], json!(2));
        assert!(pool.failed_processes().is_empty());
        assert!(pool.processes().iter().all(|p| p.end_time().is_some()));
    }

    #[tokio::test]
    #[serial]
    async fn submissions_within_limit_start_at_once() {
        let mut pool = pool(config(3), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        for id in ["a", "b", "c"] {
            pool.submit(proc(sleeper(300), id, Value::Null)).unwrap();
        }
        assert!(pool.queued_ids().is_empty());
        assert_eq!(pool.processes().len(), 3);
        assert_eq!(pool.alive_count(), 3);

        pool.join().await.unwrap();
        assert_eq!(pool.return_values().len(), 3);
    }

    #[tokio::test]
    #[serial]
    async fn concurrency_never_exceeds_limit() {
        let mut pool = pool(config(2), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        for n in 0..6 {
            pool.submit(proc(sleeper(150), &format!("w{n}"), Value::Null)).unwrap();
        }
        pool.join().await.unwrap();

        let spans: Vec<_> = pool
            .processes()
            .iter()
            .map(|p| (p.start_time().unwrap(), p.end_time().unwrap()))
            .collect();
        assert_eq!(spans.len(), 6);
        for (start, _) in &spans {
            let overlapping = spans
                .iter()
                .filter(|(s, e)| s <= start && start < e)
                .count();
            assert!(overlapping <= 2, "{overlapping} processes ran at once");
        }
    }

    #[tokio::test]
    #[serial]
    async fn more_processes_than_segment_slots() {
        let cfg = PoolConfig {
            arena_slots: 3,
            ..config(2)
        };
        let mut pool = pool(cfg, TimeoutBehavior::Error, ExitCodeBehavior::Error);
        for n in 0..8 {
            pool.submit(proc(echo(), &format!("e{n}"), json!(n))).unwrap();
        }

        pool.join().await.unwrap();

        let values = pool.return_values();
        assert_eq!(values.len(), 8);
        assert_eq!(values["e0"], json!(0));
        assert_eq!(values["e7"], json!(7));
        assert_eq!(pool.status(), PoolStatus::Done);
    }

    #[tokio::test]
    #[serial]
    async fn failed_dispatch_requeues_and_kills_survivors() {
        let cfg = PoolConfig {
            arena_slots: 2,
            ..config(2)
        };
        let mut pool = pool(cfg, TimeoutBehavior::Error, ExitCodeBehavior::Error);
        pool.submit(proc(echo(), "quick", Value::Null)).unwrap();
        pool.submit(
            proc(sleeper(30_000), "long", Value::Null).with_log_sink(Arc::new(|_: &str| {})),
        )
        .unwrap();
        pool.submit(proc(echo(), "c", Value::Null)).unwrap();
        pool.submit(proc(echo(), "d", Value::Null)).unwrap();

        // Next segment cannot be mapped.
        pool.cfg.arena_slots = usize::MAX;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(matches!(
            pool.drain_queue(),
            Err(PoolError::ResourceAcquisition { .. })
        ));
        assert_eq!(pool.queued_ids(), vec!["c", "d"]);

        let err = pool.join().await.unwrap_err();
        assert!(matches!(err, PoolError::ResourceAcquisition { .. }));
        assert_eq!(pool.alive_count(), 0);
        assert!(pool.queued_ids().is_empty());
        assert_eq!(pool.status(), PoolStatus::Killed);
        assert!(pool.process("long").unwrap().has_error());
    }

    #[tokio::test]
    #[serial]
    async fn excess_submissions_queue_in_order() {
        let mut pool = pool(config(2), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        let mut rx = pool.subscribe();
        for id in ["a", "b", "c", "d"] {
            pool.submit(proc(sleeper(300), id, Value::Null)).unwrap();
        }
        assert_eq!(pool.queued_ids(), vec!["c", "d"]);
        assert_eq!(pool.alive_count(), 2);

        pool.join().await.unwrap();

        let mut spawned = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::ProcessSpawned {
                spawned.push(ev.process.as_deref().unwrap_or_default().to_owned());
            }
        }
        assert_eq!(spawned, vec!["a", "b", "c", "d"]);
        assert!(pool.queued_ids().is_empty());
        assert_eq!(pool.return_values().len(), 4);
    }

    #[tokio::test]
    #[serial]
    async fn non_zero_exit_names_the_process() {
        let mut pool = pool(config(4), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        let work = WorkFn::arc("exit3", |_: &Args| Err::<Value, _>(TaskError::Exit { code: 3 }));
        let p = ManagedProcess::new(work, Vec::new())
            .with_id("bad")
            .with_log_sink(Arc::new(|_: &str| {}));
        pool.submit(p).unwrap();

        let err = pool.join().await.unwrap_err();
        match &err {
            PoolError::NonZeroExit { id, exit_code, code, .. } => {
                assert_eq!(id, "bad");
                assert_eq!(*exit_code, 3);
                assert_eq!(*code, FaultCode::EXIT_CODE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(pool.process("bad").unwrap().has_error());
    }

    #[tokio::test]
    #[serial]
    async fn non_zero_exit_ignored() {
        let mut pool = pool(config(4), TimeoutBehavior::Error, ExitCodeBehavior::Ignore);
        let work = WorkFn::arc("exit3", |_: &Args| Err::<Value, _>(TaskError::Exit { code: 3 }));
        pool.submit(
            ManagedProcess::new(work, Vec::new()).with_log_sink(Arc::new(|_: &str| {})),
        )
        .unwrap();

        pool.join().await.unwrap();
        assert_eq!(pool.status(), PoolStatus::Done);
        assert_eq!(pool.failed_processes().len(), 1);
    }

    #[tokio::test]
    #[serial]
    async fn timeout_kills_and_raises() {
        let mut pool = pool(config(4), TimeoutBehavior::Error, ExitCodeBehavior::Ignore);
        let p = proc(sleeper(5_000), "slow", Value::Null)
            .with_max_execution_time(Duration::from_secs(1))
            .with_log_sink(Arc::new(|_: &str| {}));
        pool.submit(p).unwrap();

        let started = std::time::Instant::now();
        let err = pool.join().await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));

        assert!(matches!(err, PoolError::Timeout { ref id, .. } if id == "slow"));
        assert_eq!(err.fault_code(), Some(FaultCode::SUPERVISION));
        let slow = pool.process("slow").unwrap();
        assert!(slow.has_error());
        assert!(slow.end_time().is_some());
        assert!(!slow.is_alive());
        assert_eq!(pool.status(), PoolStatus::Killed);
        assert_eq!(pool.killed_ids(), &["slow".to_owned()]);
    }

    #[tokio::test]
    #[serial]
    async fn slow_start_is_still_timed_out() {
        let cfg = PoolConfig {
            join_timeout: Duration::from_secs(30),
            ..config(4)
        };
        let mut pool = Pool::builder(cfg)
            .with_timeout_behavior(TimeoutBehavior::Error)
            .with_prober(Arc::new(Quiet))
            .with_stack_dump(Arc::new(SlowStart))
            .with_install_path(None)
            .build()
            .unwrap();
        let p = proc(sleeper(5_000), "late", Value::Null)
            .with_max_execution_time(Duration::from_secs(1))
            .with_log_sink(Arc::new(|_: &str| {}));
        pool.submit(p).unwrap();
        assert!(!pool.process("late").unwrap().is_running());

        let started = std::time::Instant::now();
        let err = pool.join().await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));

        assert!(matches!(err, PoolError::Timeout { ref id, .. } if id == "late"));
        let late = pool.process("late").unwrap();
        assert!(late.has_error());
        assert_ne!(late.exit_code(), Some(0));
        assert_eq!(pool.status(), PoolStatus::Killed);
    }

    #[tokio::test]
    #[serial]
    async fn timeout_ignored_still_kills() {
        let mut pool = pool(config(4), TimeoutBehavior::Ignore, ExitCodeBehavior::Ignore);
        let p = proc(sleeper(5_000), "slow", Value::Null)
            .with_max_execution_time(Duration::from_secs(1))
            .with_log_sink(Arc::new(|_: &str| {}));
        pool.submit(p).unwrap();

        pool.join().await.unwrap();
        let slow = pool.process("slow").unwrap();
        assert!(slow.has_error());
        assert!(slow.end_time().is_some());
        assert_eq!(pool.status(), PoolStatus::Killed);
    }

    #[tokio::test]
    #[serial]
    async fn kill_all_leaves_nothing_alive() {
        let mut pool = pool(config(2), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        for id in ["x", "y", "z"] {
            let p = proc(sleeper(30_000), id, Value::Null).with_log_sink(Arc::new(|_: &str| {}));
            pool.submit(p).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        pool.kill_all().await.unwrap();

        assert_eq!(pool.alive_count(), 0);
        assert!(pool.queued_ids().is_empty());
        assert_eq!(pool.status(), PoolStatus::Killed);
        for p in pool.processes() {
            assert!(p.has_error());
            assert!(p.end_time().is_some());
        }
        assert_eq!(pool.killed_ids().len(), 2);
    }

    #[tokio::test]
    #[serial]
    async fn kill_process_twice_records_once() {
        let mut pool = pool(config(2), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        let p = proc(sleeper(30_000), "k", Value::Null).with_log_sink(Arc::new(|_: &str| {}));
        pool.submit(p).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        pool.kill_process("k").await.unwrap();
        pool.kill_process("k").await.unwrap();

        assert_eq!(pool.killed_ids(), &["k".to_owned()]);
        assert!(!pool.process("k").unwrap().is_alive());
        assert!(matches!(
            pool.kill_process("nope").await,
            Err(PoolError::UnknownProcess(_))
        ));
    }

    #[tokio::test]
    #[serial]
    async fn duplicate_ids_are_rejected() {
        let mut pool = pool(config(1), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        pool.submit(proc(sleeper(100), "same", Value::Null)).unwrap();
        pool.submit(proc(sleeper(100), "queued", Value::Null)).unwrap();

        assert!(matches!(
            pool.submit(proc(echo(), "same", Value::Null)),
            Err(PoolError::DuplicateId(id)) if id == "same"
        ));
        assert!(matches!(
            pool.submit(proc(echo(), "queued", Value::Null)),
            Err(PoolError::DuplicateId(_))
        ));
        pool.join().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn stuck_processes_exhaust_respawn_budget() {
        let cfg = PoolConfig {
            stuck_after: Some(Duration::from_millis(200)),
            respawn_backoff: BackoffPolicy::none(),
            ..config(4)
        };
        let mut pool = Pool::builder(cfg)
            .with_prober(Arc::new(Quiet))
            .with_stack_dump(Arc::new(Hang))
            .with_install_path(None)
            .build()
            .unwrap();
        let mut rx = pool.subscribe();
        pool.submit(proc(echo(), "stuck", Value::Null)).unwrap();

        let err = pool.join().await.unwrap_err();
        assert!(matches!(err, PoolError::RespawnExhausted { budget: 5, .. }));
        assert_eq!(err.fault_code(), Some(FaultCode::SUPERVISION));

        let mut spawned = Vec::new();
        let mut respawned = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev.kind {
                EventKind::ProcessSpawned => {
                    spawned.push(ev.process.as_deref().unwrap_or_default().to_owned())
                }
                EventKind::ProcessRespawned => respawned += 1,
                _ => {}
            }
        }
        assert_eq!(spawned.len(), 6);
        assert_eq!(spawned[0], "stuck");
        assert_eq!(spawned[1], "stuck-1");
        assert_eq!(spawned[2], "stuck-1-2");
        assert!(spawned.iter().all(|id| id.starts_with("stuck")));
        assert_eq!(respawned, 5);
        assert_eq!(pool.alive_count(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn return_values_only_after_exit() {
        let mut pool = pool(config(2), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        pool.submit(proc(sleeper(300), "late", Value::Null)).unwrap();
        assert!(pool.return_values().is_empty());

        pool.join().await.unwrap();
        assert_eq!(pool.return_value_list(), vec![json!("slept")]);
        assert_eq!(pool.return_values_by_name()["late"], json!("slept"));
    }

    #[tokio::test]
    #[serial]
    async fn subscribers_see_pool_lifecycle() {
        let kinds = Arc::new(Kinds::default());
        let subs: Vec<Arc<dyn Subscribe>> = vec![kinds.clone()];
        let mut pool = Pool::builder(config(2))
            .with_subscribers(subs)
            .with_prober(Arc::new(Quiet))
            .build()
            .unwrap();
        pool.submit(proc(echo(), "one", json!(1))).unwrap();
        pool.join().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = kinds.0.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&EventKind::ProcessSpawned));
        assert!(seen.contains(&EventKind::PoolWorking));
        assert!(seen.contains(&EventKind::ProcessExited));
        assert_eq!(seen.last(), Some(&EventKind::PoolDone));
    }

    #[tokio::test]
    #[serial]
    async fn cancellation_aborts_join() {
        let mut pool = pool(config(2), TimeoutBehavior::Error, ExitCodeBehavior::Error);
        pool.submit(
            proc(sleeper(30_000), "long", Value::Null).with_log_sink(Arc::new(|_: &str| {})),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        assert!(matches!(pool.join_until(cancel).await, Err(PoolError::Aborted)));
        assert_eq!(pool.alive_count(), 0);
        assert_eq!(pool.status(), PoolStatus::Killed);
    }

    #[tokio::test]
    #[serial]
    async fn persistence_through_pool_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlStore::new(dir.path().join("procs.jsonl")));
        let mut pool = Pool::builder(config(2))
            .with_store(store.clone())
            .with_prober(Arc::new(Quiet))
            .build()
            .unwrap();
        pool.submit(proc(echo(), "saved", json!(9)).with_persistence(true))
            .unwrap();
        pool.submit(proc(echo(), "unsaved", json!(1))).unwrap();
        pool.join().await.unwrap();

        let records = store.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "saved");
        assert!(!records[0].alive);
        assert_eq!(records[0].return_value, Some(json!(9)));
    }

    #[test]
    fn resource_failure_marks_worker_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlStore::new(dir.path().join("procs.jsonl")));
        let cfg = PoolConfig {
            arena_slots: usize::MAX,
            acquire_retries: 2,
            acquire_delay: Duration::ZERO,
            ..PoolConfig::default()
        };

        let err = Pool::builder(cfg).with_store(store.clone()).build().unwrap_err();
        assert!(matches!(err, PoolError::ResourceAcquisition { attempts: 2, .. }));
        assert_eq!(
            store.corrupted_workers().unwrap(),
            vec![format!("{}_WORKER_CORRUPTED", std::process::id())]
        );
    }
}
