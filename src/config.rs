//! # Pool configuration.
//!
//! Provides [`PoolConfig`], the centralized settings for a [`Pool`](crate::Pool).
//!
//! Config is used in two ways:
//! 1. **Pool creation**: `Pool::builder(config)`
//! 2. **Process defaults**: processes keep their own `join_timeout`/`dump_wait`
//!    unless they were never customized (see [`ManagedProcess`](crate::ManagedProcess)).
//!
//! ## External option
//! The concurrency limit is the one knob expected to come from the host program's
//! configuration: [`PoolConfig::from_options`] reads `multiple_process_limit`
//! from an options object.
//!
//! ## Sentinel values
//! - `limit = 0` → clamped to 1 (a pool that can never spawn would deadlock `join`)
//! - `stuck_after = None` → `max(max_execution_time, 600s) / 10`

use std::time::Duration;

use serde_json::Value;

use crate::policies::BackoffPolicy;

/// Options key holding the concurrency limit.
pub const PROCESS_LIMIT_OPTION: &str = "multiple_process_limit";

/// Floor of the stuck-before-start heuristic, before the division by ten.
const STUCK_FLOOR: Duration = Duration::from_secs(600);

/// Global configuration of one pool.
///
/// ## Field semantics
/// - `limit`: max processes alive at once; excess submissions wait (FIFO)
/// - `respawn_budget`: stuck-before-start respawns allowed per `join`
/// - `join_timeout`: default bounded cooperative wait per process
/// - `dump_wait`: pause between the stack-dump request and `SIGTERM` in `kill()`
/// - `poll_interval`: granularity of liveness polling while waiting
/// - `stuck_after`: override of the stuck-before-start threshold
/// - `respawn_backoff`: pause after each respawn
/// - `arena_slots` / `slot_capacity`: shared-state segment geometry
/// - `acquire_retries` / `acquire_delay`: bounded retry for mapping the segment
/// - `bus_capacity`: event bus ring buffer size (min 1)
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum number of processes alive at the same time.
    pub limit: usize,

    /// Number of stuck-before-start respawns tolerated by one `join`.
    ///
    /// The respawn that would exceed it makes `join` fail with
    /// [`PoolError::RespawnExhausted`](crate::PoolError::RespawnExhausted).
    pub respawn_budget: u32,

    /// Grace period for cooperative exit, applied to processes that keep the default.
    pub join_timeout: Duration,

    /// Time a process is given to dump its stack before it is asked to terminate.
    pub dump_wait: Duration,

    /// Liveness polling interval used by bounded waits.
    pub poll_interval: Duration,

    /// Stuck-before-start threshold override.
    ///
    /// `None` derives it per process from its maximum execution time.
    pub stuck_after: Option<Duration>,

    /// Pause after each respawn.
    pub respawn_backoff: BackoffPolicy,

    /// Number of processes the shared-state segment can host over the pool lifetime.
    pub arena_slots: usize,

    /// Size in bytes of the return-value cell of each slot.
    pub slot_capacity: usize,

    /// Attempts made to map the shared-state segment.
    pub acquire_retries: u32,

    /// Delay between mapping attempts.
    pub acquire_delay: Duration,

    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
}

impl PoolConfig {
    /// Builds a config whose concurrency limit comes from a host options object.
    ///
    /// Reads [`PROCESS_LIMIT_OPTION`] as a number or a numeric string. Missing or
    /// unparsable values keep the default (50).
    ///
    /// # Example
    /// ```
    /// use procvisor::PoolConfig;
    ///
    /// let cfg = PoolConfig::from_options(&serde_json::json!({ "multiple_process_limit": "8" }));
    /// assert_eq!(cfg.limit, 8);
    ///
    /// let cfg = PoolConfig::from_options(&serde_json::json!({}));
    /// assert_eq!(cfg.limit, 50);
    /// ```
    pub fn from_options(options: &Value) -> Self {
        let mut cfg = Self::default();
        let limit = match options.get(PROCESS_LIMIT_OPTION) {
            Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
            Some(Value::String(s)) => s.trim().parse::<usize>().ok(),
            _ => None,
        };
        if let Some(limit) = limit {
            cfg.limit = limit;
        }
        cfg
    }

    /// Returns the concurrency limit clamped to a minimum of 1.
    #[inline]
    pub fn limit_clamped(&self) -> usize {
        self.limit.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Elapsed time after which a dispatched process that is still not running
    /// counts as stuck before start.
    ///
    /// Without an override: `max(max_execution_time, 600s) / 10`, where an
    /// unlimited execution time counts as zero.
    pub fn stuck_threshold(&self, max_execution_time: Option<Duration>) -> Duration {
        if let Some(fixed) = self.stuck_after {
            return fixed;
        }
        max_execution_time.unwrap_or_default().max(STUCK_FLOOR) / 10
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            limit: 50,
            respawn_budget: 5,
            join_timeout: Duration::from_secs(30),
            dump_wait: Duration::from_secs(1),
            poll_interval: Duration::from_millis(25),
            stuck_after: None,
            respawn_backoff: BackoffPolicy::default(),
            arena_slots: 1024,
            slot_capacity: 64 * 1024,
            acquire_retries: 5,
            acquire_delay: Duration::from_secs(1),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stuck_threshold_follows_execution_time() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.stuck_threshold(None), Duration::from_secs(60));
        assert_eq!(
            cfg.stuck_threshold(Some(Duration::from_secs(1))),
            Duration::from_secs(60)
        );
        assert_eq!(
            cfg.stuck_threshold(Some(Duration::from_secs(3600))),
            Duration::from_secs(360)
        );
    }

    #[test]
    fn stuck_threshold_override_wins() {
        let cfg = PoolConfig {
            stuck_after: Some(Duration::from_millis(200)),
            ..PoolConfig::default()
        };
        assert_eq!(
            cfg.stuck_threshold(Some(Duration::from_secs(3600))),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn limit_from_options() {
        assert_eq!(PoolConfig::from_options(&json!({ "multiple_process_limit": 12 })).limit, 12);
        assert_eq!(PoolConfig::from_options(&json!({ "multiple_process_limit": " 3 " })).limit, 3);
        assert_eq!(PoolConfig::from_options(&json!({ "multiple_process_limit": "many" })).limit, 50);
        assert_eq!(PoolConfig::from_options(&json!(null)).limit, 50);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let cfg = PoolConfig {
            limit: 0,
            ..PoolConfig::default()
        };
        assert_eq!(cfg.limit_clamped(), 1);
    }
}
