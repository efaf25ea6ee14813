//! # Pool: owns managed processes, enforces admission and aggregates outcome.
//!
//! The [`Pool`] owns the shared-state arena, the event bus, a [`SubscriberSet`] and
//! the bookkeeping of one batch of managed processes:
//!
//! ```text
//! submit(p) ──► duplicate id? ──► DuplicateId
//!     │
//!     ├─ alive < limit ──► attach slot ──► fork ──► tracked (insertion order)
//!     └─ otherwise ─────► wait queue (FIFO) ──► dispatched by join as capacity frees
//!
//! join() ──► Working ──► loop until nothing alive and queue empty:
//!              drain queue │ observe exits │ stuck? respawn │ over time? kill │ wait
//!        ──► timeout error │ non-zero exit error │ Done
//!
//! kill_process(id): kill() ─► wait join_timeout ─► SIGKILL + reap ─► killed-set
//! ```
//!
//! ## Rules
//! - Bookkeeping is mutated only through `&mut self`; the pool is driven by one task.
//! - Ids are unique across tracked, queued and killed processes.
//! - A killed id is never reprocessed by the join loop.
//! - Return values are readable only once a process is no longer alive.
//!
//! ## Example
//! ```no_run
//! use procvisor::{ExitCodeBehavior, ManagedProcess, Pool, TaskError, TimeoutBehavior, WorkFn};
//! use serde_json::{json, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pool = Pool::new(TimeoutBehavior::Error, ExitCodeBehavior::Error)?;
//!
//! for n in 0..3 {
//!     let work = WorkFn::arc("square", |args: &Vec<Value>| {
//!         let n = args[0].as_i64().unwrap_or_default();
//!         Ok::<_, TaskError>(json!(n * n))
//!     });
//!     pool.submit(ManagedProcess::new(work, vec![json!(n)]).with_id(format!("sq-{n}")))?;
//! }
//!
//! pool.join().await?;
//! assert_eq!(pool.return_values()["sq-2"], json!(4));
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::core::admission::Admission;
use crate::core::builder::PoolBuilder;
use crate::core::status::PoolStatus;
use crate::error::PoolError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::{ExitCodeBehavior, TimeoutBehavior};
use crate::process::{ManagedProcess, ProcessContext};
use crate::shared::{Arena, Slot};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Supervisor of a batch of managed processes.
pub struct Pool {
    pub(super) cfg: PoolConfig,
    timeout_behavior: TimeoutBehavior,
    exit_code_behavior: ExitCodeBehavior,
    pub(super) status: PoolStatus,

    pub(super) processes: Vec<ManagedProcess>,
    pub(super) admission: Admission,
    killed: Vec<String>,
    exited: HashSet<String>,

    arena: Arc<Arena>,
    ctx: ProcessContext,
    pub(super) bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    listener: Option<CancellationToken>,
}

impl Pool {
    /// Creates a pool with the default configuration and the given behaviors.
    pub fn new(
        timeout_behavior: TimeoutBehavior,
        exit_code_behavior: ExitCodeBehavior,
    ) -> Result<Self, PoolError> {
        Self::builder(PoolConfig::default())
            .with_timeout_behavior(timeout_behavior)
            .with_exit_code_behavior(exit_code_behavior)
            .build()
    }

    /// Creates a builder for a pool with optional collaborators.
    pub fn builder(cfg: PoolConfig) -> PoolBuilder {
        PoolBuilder::new(cfg)
    }

    pub(super) fn assemble(
        cfg: PoolConfig,
        timeout_behavior: TimeoutBehavior,
        exit_code_behavior: ExitCodeBehavior,
        arena: Arc<Arena>,
        bus: Bus,
        ctx: ProcessContext,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        Self {
            admission: Admission::new(cfg.limit_clamped()),
            cfg,
            timeout_behavior,
            exit_code_behavior,
            status: PoolStatus::Idle,
            processes: Vec::new(),
            killed: Vec::new(),
            exited: HashSet::new(),
            arena,
            ctx,
            bus,
            subscribers,
            listener: None,
        }
    }

    /// Starts forwarding bus events to the subscriber set (once, inside a runtime).
    pub(super) fn ensure_listener(&mut self) {
        if self.listener.is_some() || self.subscribers.is_empty() {
            return;
        }
        let token = CancellationToken::new();
        self.listener = Some(token.clone());

        let set = SubscriberSet::new(std::mem::take(&mut self.subscribers), self.bus.clone());
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit(Arc::new(ev)),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            // Forward what was published before the pool went away.
            while let Ok(ev) = rx.try_recv() {
                set.emit(Arc::new(ev));
            }
            set.shutdown().await;
        });
    }

    /// Receiver of every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Submits a process: dispatched now if capacity allows, queued (FIFO) otherwise.
    ///
    /// The pool's collaborators and default timings are attached to the process;
    /// a store set on the process itself is kept.
    pub fn submit(&mut self, mut process: ManagedProcess) -> Result<(), PoolError> {
        let id = process.id().to_owned();
        if self.is_known(&id) {
            return Err(PoolError::DuplicateId(id));
        }

        let store = process.ctx.store.take().or_else(|| self.ctx.store.clone());
        process.ctx = self.ctx.clone();
        process.ctx.store = store;

        if self.admission.has_capacity(self.alive_count()) {
            self.dispatch(process)
        } else {
            let position = self.admission.enqueue(process);
            tracing::debug!(target: "procvisor.pool", id = %id, position, "process queued");
            self.bus.publish(
                Event::new(EventKind::ProcessQueued)
                    .with_process(id)
                    .with_attempt(u32::try_from(position).unwrap_or(u32::MAX)),
            );
            Ok(())
        }
    }

    /// Attaches a slot, forks and starts tracking the process.
    pub(super) fn dispatch(&mut self, process: ManagedProcess) -> Result<(), PoolError> {
        self.try_dispatch(process).map_err(|(_, err)| err)
    }

    /// Like `dispatch`, but hands the process back when it could not be started.
    fn try_dispatch(
        &mut self,
        mut process: ManagedProcess,
    ) -> Result<(), (ManagedProcess, PoolError)> {
        let slot = match self.next_slot() {
            Ok(slot) => slot,
            Err(err) => return Err((process, err)),
        };
        process.attach(slot);

        let pid = match process.start() {
            Ok(pid) => pid,
            Err(source) => {
                let err = PoolError::Spawn {
                    id: process.id().to_owned(),
                    source,
                };
                return Err((process, err));
            }
        };
        tracing::info!(target: "procvisor.pool", id = %process.id(), pid, "process spawned");
        self.bus.publish(
            Event::new(EventKind::ProcessSpawned)
                .with_process(process.id())
                .with_pid(pid),
        );
        self.processes.push(process);
        Ok(())
    }

    /// Next free slot. A full segment is replaced by a freshly mapped one; the old
    /// segment stays mapped until the last process holding one of its slots is dropped.
    fn next_slot(&mut self) -> Result<Slot, PoolError> {
        if let Some(slot) = self.arena.slot() {
            return Ok(slot);
        }
        let arena = Arena::map(self.cfg.arena_slots, self.cfg.slot_capacity)
            .map_err(|source| PoolError::ResourceAcquisition {
                attempts: 1,
                source,
            })?;
        tracing::debug!(target: "procvisor.pool", slots = arena.slots(), "shared-state segment full; mapped another");
        self.arena = Arc::new(arena);
        self.arena.slot().ok_or(PoolError::SlotsExhausted {
            slots: self.arena.slots(),
        })
    }

    /// Dispatches queued processes while capacity allows.
    ///
    /// A process that fails to start goes back to the head of the queue.
    pub(super) fn drain_queue(&mut self) -> Result<(), PoolError> {
        while let Some(next) = self.admission.next_ready(self.alive_count()) {
            if let Err((process, err)) = self.try_dispatch(next) {
                self.admission.requeue_front(process);
                return Err(err);
            }
        }
        Ok(())
    }

    fn is_known(&self, id: &str) -> bool {
        self.processes.iter().any(|p| p.id() == id)
            || self.admission.contains(id)
            || self.killed.iter().any(|k| k == id)
    }

    pub(super) fn index_of(&self, id: &str) -> Option<usize> {
        self.processes.iter().position(|p| p.id() == id)
    }

    pub(super) fn is_killed(&self, id: &str) -> bool {
        self.killed.iter().any(|k| k == id)
    }

    /// Escalating kill of the tracked process at `idx`.
    ///
    /// `kill()`, bounded cooperative wait, then `SIGKILL` and reap. The id enters the
    /// killed-set exactly once, whatever the outcome.
    pub(super) async fn terminate(&mut self, idx: usize) -> Result<(), PoolError> {
        let process = &self.processes[idx];
        let id = process.id().to_owned();
        let pid = process.pid().unwrap_or_default();

        let mut how = "terminated";
        let mut result = process.kill().await;
        if result.is_ok() && !process.wait_timeout(process.join_timeout()).await {
            how = "hard-killed";
            tracing::warn!(target: "procvisor.pool", id = %id, pid, "cooperative exit timed out; sending SIGKILL");
            result = process.hard_kill();
            if result.is_ok() {
                process.wait_timeout(process.join_timeout()).await;
            }
        }

        if !self.is_killed(&id) {
            self.killed.push(id.clone());
        }
        self.bus.publish(
            Event::new(EventKind::ProcessKilled)
                .with_process(id.as_str())
                .with_pid(pid)
                .with_reason(how),
        );
        result.map_err(|source| PoolError::Signal { id, source })
    }

    /// Escalating kill of one tracked process by id.
    pub async fn kill_process(&mut self, id: &str) -> Result<(), PoolError> {
        let idx = self
            .index_of(id)
            .ok_or_else(|| PoolError::UnknownProcess(id.to_owned()))?;
        self.terminate(idx).await?;
        self.processes[idx].stamp_end();
        Ok(())
    }

    /// Force-terminates every alive process and discards the wait queue.
    ///
    /// Every process that was alive ends with `error = true` and an end time.
    /// Status becomes `Killed`. All processes are attempted; the first failure is returned.
    pub async fn kill_all(&mut self) -> Result<(), PoolError> {
        let discarded = self.admission.clear();
        if !discarded.is_empty() {
            tracing::warn!(target: "procvisor.pool", count = discarded.len(), "queued processes discarded");
        }

        let mut first_err = None;
        for idx in 0..self.processes.len() {
            if !self.processes[idx].is_alive() {
                continue;
            }
            if let Err(err) = self.terminate(idx).await {
                first_err.get_or_insert(err);
            }
            let process = &self.processes[idx];
            process.stamp_end();
            process.flag_error();
        }

        self.status = PoolStatus::Killed;
        self.bus
            .publish(Event::new(EventKind::PoolKilled).with_reason("kill_all"));
        first_err.map_or(Ok(()), Err)
    }

    /// Stamps the end time of an exited process and publishes `ProcessExited` once.
    pub(super) fn observe_exit(&mut self, idx: usize) {
        let process = &self.processes[idx];
        process.stamp_end();
        if self.exited.insert(process.id().to_owned()) {
            let mut ev = Event::new(EventKind::ProcessExited)
                .with_process(process.id())
                .with_pid(process.pid().unwrap_or_default());
            if let Some(code) = process.exit_code() {
                ev = ev.with_exit_code(code);
            }
            self.bus.publish(ev);
        }
    }

    /// Tracked processes in insertion order.
    pub fn processes(&self) -> &[ManagedProcess] {
        &self.processes
    }

    /// Tracked, not killed, still alive.
    pub fn alive_processes(&self) -> Vec<&ManagedProcess> {
        self.processes
            .iter()
            .filter(|p| !self.is_killed(p.id()) && p.is_alive())
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.processes
            .iter()
            .filter(|p| !self.is_killed(p.id()) && p.is_alive())
            .count()
    }

    pub fn process(&self, id: &str) -> Option<&ManagedProcess> {
        self.processes.iter().find(|p| p.id() == id)
    }

    pub fn process_mut(&mut self, id: &str) -> Option<&mut ManagedProcess> {
        self.processes.iter_mut().find(|p| p.id() == id)
    }

    /// Ids waiting for capacity, in dispatch order.
    pub fn queued_ids(&self) -> Vec<&str> {
        self.admission.ids()
    }

    /// Ids killed by the pool, in kill order.
    pub fn killed_ids(&self) -> &[String] {
        &self.killed
    }

    /// Return values of processes that are no longer alive, keyed by id.
    ///
    /// A process whose `on_finish` hook failed keeps the value its work produced;
    /// check [`failed_processes`](Self::failed_processes) before trusting it.
    pub fn return_values(&self) -> HashMap<String, Value> {
        self.finished_values()
            .map(|(p, v)| (p.id().to_owned(), v))
            .collect()
    }

    /// Same as [`return_values`](Self::return_values), keyed by process name.
    pub fn return_values_by_name(&self) -> HashMap<String, Value> {
        self.finished_values()
            .map(|(p, v)| (p.name().to_owned(), v))
            .collect()
    }

    /// Return values in tracking order, without keys.
    pub fn return_value_list(&self) -> Vec<Value> {
        self.finished_values().map(|(_, v)| v).collect()
    }

    fn finished_values(&self) -> impl Iterator<Item = (&ManagedProcess, Value)> {
        self.processes
            .iter()
            .filter_map(|p| p.return_value().map(|v| (p, v)))
    }

    /// Processes currently flagged `error = true`.
    pub fn failed_processes(&self) -> Vec<&ManagedProcess> {
        self.processes.iter().filter(|p| p.has_error()).collect()
    }

    pub fn status(&self) -> PoolStatus {
        self.status
    }

    pub fn timeout_behavior(&self) -> TimeoutBehavior {
        self.timeout_behavior
    }

    pub fn exit_code_behavior(&self) -> ExitCodeBehavior {
        self.exit_code_behavior
    }

    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some(token) = &self.listener {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status)
            .field("limit", &self.admission.limit())
            .field("processes", &self.processes.len())
            .field("queued", &self.admission.ids())
            .field("killed", &self.killed)
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}
