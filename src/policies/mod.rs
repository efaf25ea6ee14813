//! Supervision policies.
//!
//! This module groups the knobs that control **whether** a per-process failure
//! escalates into an error returned by [`Pool::join`](crate::Pool::join) and
//! **how long** the pool pauses after respawning a stuck process.
//!
//! ## Contents
//! - [`TimeoutBehavior`]  what a timed-out process means for `join` (ignore / error)
//! - [`ExitCodeBehavior`] what a non-zero exit code means for `join` (ignore / error)
//! - [`BackoffPolicy`]    how respawn delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]     randomization strategy for respawn delays
//!
//! ## Quick wiring
//! ```text
//! Pool { timeout_behavior, exit_code_behavior, cfg.respawn_backoff }
//!      └─► core::join uses:
//!           - timeout_behavior to decide whether a kill-on-timeout is fatal
//!           - exit_code_behavior to decide whether a non-zero exit is fatal
//!           - respawn_backoff.next(n) to pause after the n-th respawn
//! ```
//!
//! ## Defaults
//! - Both behaviors default to `Error`.
//! - `PoolConfig::default().respawn_backoff` → first=2s, factor=1.5, max=10s, jitter=None.

mod backoff;
mod behavior;
mod jitter;

pub use backoff::BackoffPolicy;
pub use behavior::{ExitCodeBehavior, TimeoutBehavior};
pub use jitter::JitterPolicy;
