//! # Pool events.
//!
//! The [`EventKind`] enum classifies events across three categories:
//! - **Pool events**: status transitions of the pool itself
//! - **Process events**: admission, spawn, exit, timeout, stuck detection, respawn, kill
//! - **Subscriber events**: overflow and panics in the fan-out layer
//!
//! The [`Event`] struct carries optional metadata such as the process id, pid,
//! exit code, respawn number and delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TimeoutHit)
//!     .with_process("nightly-backup")
//!     .with_pid(4242)
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert_eq!(ev.kind, EventKind::TimeoutHit);
//! assert_eq!(ev.process.as_deref(), Some("nightly-backup"));
//! assert_eq!(ev.timeout_ms, Some(5_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of pool events.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Pool ===
    /// `join` started; status is `Working`.
    PoolWorking,

    /// `join` finished without a forced kill; status is `Done`.
    PoolDone,

    /// A timeout or `kill_all` forced status `Killed`.
    ///
    /// Sets `reason`.
    PoolKilled,

    // === Process lifecycle ===
    /// Submission parked in the wait queue (limit reached).
    ///
    /// Sets `process`, `attempt` (queue position, 1-based).
    ProcessQueued,

    /// Process forked.
    ///
    /// Sets `process`, `pid`.
    ProcessSpawned,

    /// The pool observed the process exit (once per id).
    ///
    /// Sets `process`, `pid`, `exit_code`.
    ProcessExited,

    /// Process ran past its maximum execution time.
    ///
    /// Sets `process`, `pid`, `timeout_ms`.
    TimeoutHit,

    /// Process never reached `running` within the stuck threshold.
    ///
    /// Sets `process`, `pid`, `timeout_ms` (threshold).
    StuckDetected,

    /// Stuck process replaced by a clone.
    ///
    /// Sets `process` (clone id), `reason` (original id), `attempt` (respawn
    /// number), `delay_ms` (pause before the loop resumes).
    ProcessRespawned,

    /// Process terminated by the pool (escalating kill finished).
    ///
    /// Sets `process`, `pid`, `reason` (`"terminated"` or `"hard-killed"`).
    ProcessKilled,

    // === Subscribers ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `process` (subscriber name), `reason`.
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets `process` (subscriber name), `reason` (panic message).
    SubscriberPanicked,
}

/// Pool event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Managed process id (or subscriber name for subscriber events).
    pub process: Option<Arc<str>>,
    /// OS pid.
    pub pid: Option<i32>,
    /// Exit code (negative signal number for signal deaths).
    pub exit_code: Option<i32>,
    /// Respawn number or queue position.
    pub attempt: Option<u32>,
    /// Time bound in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            process: None,
            pid: None,
            exit_code: None,
            attempt: None,
            timeout_ms: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_process(mut self, id: impl Into<Arc<str>>) -> Self {
        self.process = Some(id.into());
        self
    }

    /// Attaches an OS pid.
    #[inline]
    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an exit code.
    #[inline]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Attaches a respawn number / queue position.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a time bound (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_process(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_process(subscriber)
            .with_reason(info)
    }

    /// Whether this event comes from the subscriber layer itself.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
