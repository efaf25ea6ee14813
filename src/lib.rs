//! # procvisor
//!
//! **Procvisor** runs units of synchronous work in forked child processes and
//! supervises them as a batch.
//!
//! A [`Pool`] admits processes up to a concurrency limit, queues the rest, detects
//! children that never begin executing and replaces them, kills children that run
//! past their execution limit, and aggregates exit codes and return values once
//! every child has finished. Return values travel back through a shared anonymous
//! memory segment ([`Arena`]) as JSON.
//!
//! ## Architecture
//! ```text
//!   ManagedProcess   ManagedProcess   ManagedProcess
//!   (work + args)    (work + args)    (work + args)
//!         │                │                │
//!         ▼                ▼                ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │ Pool                                                      │
//! │  - Admission (limit + FIFO wait queue)                    │
//! │  - Arena (shared slots: flags, times, return value)       │
//! │  - Bus (broadcast events) ──► SubscriberSet               │
//! │  - join loop: stuck respawn │ timeout kill │ aggregation  │
//! └──────┬─────────────────┬─────────────────┬────────────────┘
//!        ▼ fork            ▼ fork            ▼ fork
//!   ┌──────────┐      ┌──────────┐      ┌──────────┐
//!   │  child   │      │  child   │      │  child   │
//!   │ work.run │      │ work.run │      │ work.run │
//!   └────┬─────┘      └────┬─────┘      └────┬─────┘
//!        └── slot: running / error / start / end / return ──► Pool
//! ```
//!
//! ### Kill escalation
//! ```text
//! kill() ─► log line ─► probes (ps, pgrep) ─► crash report ─► SIGUSR2 (stack dump)
//!        ─► sleep dump_wait ─► SIGTERM ─► wait join_timeout ─► SIGKILL
//! ```
//!
//! ## Features
//! | Area            | Description                                              | Key types                                  |
//! |-----------------|----------------------------------------------------------|--------------------------------------------|
//! | **Pool**        | Admission, supervision and outcome aggregation.          | [`Pool`], [`PoolBuilder`], [`PoolStatus`]  |
//! | **Processes**   | One unit of work in a forked child.                      | [`ManagedProcess`], [`ExitState`]          |
//! | **Work**        | Synchronous work returning a JSON value.                 | [`Work`], [`WorkFn`], [`WorkRef`]          |
//! | **Policies**    | Failure classification and respawn backoff.              | [`TimeoutBehavior`], [`ExitCodeBehavior`], [`BackoffPolicy`] |
//! | **Diagnostics** | Log sinks, crash reports, kill probes, stack dumps.      | [`LogSink`], [`CrashReporter`], [`Prober`], [`StackDump`] |
//! | **Persistence** | Optional process status records.                         | [`ProcessStore`], [`JsonlStore`]           |
//! | **Events**      | Lifecycle events for subscribers.                        | [`Event`], [`Subscribe`]                   |
//! | **Errors**      | Typed errors with labels and fault codes.                | [`PoolError`], [`TaskError`], [`ProcessError`] |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] subscriber _(demo/reference only)_.
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use procvisor::{ManagedProcess, Pool, PoolConfig, TaskError, WorkFn};
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = PoolConfig::default();
//!     cfg.limit = 4;
//!
//!     let mut pool = Pool::builder(cfg).build()?;
//!     let work = WorkFn::arc("hello", |_: &Vec<serde_json::Value>| {
//!         Ok::<_, TaskError>(json!("hello from a child"))
//!     });
//!     pool.submit(
//!         ManagedProcess::new(work, Vec::new())
//!             .with_id("hello")
//!             .with_max_execution_time(Duration::from_secs(5)),
//!     )?;
//!
//!     pool.join().await?;
//!     println!("{:?}", pool.return_values());
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod diagnostics;
mod error;
mod events;
mod policies;
mod process;
mod shared;
mod store;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use config::{PROCESS_LIMIT_OPTION, PoolConfig};
pub use crate::core::{Pool, PoolBuilder, PoolStatus};
pub use diagnostics::{
    CrashRef, CrashReporter, Diagnostics, DumpRef, DumpTarget, FileSink, LocalProber, LogSink,
    ProbeCommand, ProbeError, ProbeOutput, Prober, ProberRef, SignalStackDump, SinkRef,
    StackDump, TracingCrashReporter, TracingSink, kill_probes,
};
pub use error::{FaultCode, PoolError, ProcessError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, ExitCodeBehavior, JitterPolicy, TimeoutBehavior};
pub use process::{ExitState, ManagedProcess};
pub use shared::{Arena, Slot, SlotError};
pub use store::{
    JsonlStore, ProcessRecord, ProcessStore, StoreError, StoreRef, worker_corrupted_key,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{Args, Work, WorkFn, WorkRef};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
