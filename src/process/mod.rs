//! # Managed processes.
//!
//! A [`ManagedProcess`] binds one unit of [`Work`](crate::Work) to one forked OS
//! process. The parent keeps the handle (identity, limits, pid, exit state); the
//! child runs the work and reports through its shared-state [`Slot`](crate::shared::Slot).
//!
//! ```text
//! parent (supervisor)                         child (fork)
//! ───────────────────                         ────────────
//! start() ── fork ──────────────────────────► install stack dump handler
//!   pid, dispatch instant                     start_ms, running = true
//!                                             persist(alive = true)
//!                                             work.run(args)
//!                                               Ok  → return cell, end_ms, error = false,
//!                                                     persist(alive = false), on_finish
//!                                               Err → crash report, sink, error = true,
//!                                                     end_ms, persist(alive = false)
//! is_alive() / wait_timeout() ◄── waitpid ─── _exit(code)
//! kill(): probes → dump request → dump_wait → SIGTERM
//! ```
//!
//! ## Rules
//! - Work never touches the parent's async runtime; the child leaves through `_exit`.
//! - Exit codes: normal exit `code`, signal death `-signal`.
//! - `kill()` on a process that was never started or already exited is a no-op.

mod child;
mod context;
mod exit;
mod managed;

pub(crate) use child::exit_now;
pub(crate) use context::ProcessContext;
pub use exit::ExitState;
pub use managed::ManagedProcess;
