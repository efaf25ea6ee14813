//! # Cross-process shared state.
//!
//! Flags, timestamps and return values written by a forked child must be visible to
//! the supervisor without any message passing. [`Arena`] maps one anonymous shared
//! segment before any fork; every managed process gets a fixed [`Slot`] inside it.
//!
//! ```text
//! Arena (MAP_SHARED | MAP_ANONYMOUS, one segment at a time per pool)
//! ┌──────────────┬──────────────┬─────┬──────────────┐
//! │ slot 0       │ slot 1       │ ... │ slot N-1     │
//! │ header│cell  │ header│cell  │     │ header│cell  │
//! └──────────────┴──────────────┴─────┴──────────────┘
//! header: running, error, return state, return len, start ms, end ms
//! cell:   JSON-encoded return value (≤ slot capacity)
//! ```
//!
//! ## Rules
//! - Slots are handed out once per segment. A pool maps a fresh segment when the
//!   current one is full.
//! - A segment is unmapped when the last [`Slot`] referring to it is dropped.
//! - Timestamps are unix milliseconds; `0` means "unset".
//! - The end time is written at most once (first writer wins).

mod arena;

pub use arena::{Arena, Slot, SlotError};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix milliseconds (never `0`).
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
        .max(1)
}
