//! # Respawn backoff.
//!
//! After the pool destroys a stuck-before-start process and submits its clone, it
//! pauses before looking at the next process. The pause grows with every respawn
//! charged against the budget so a loaded host gets time to settle:
//!
//! ```text
//! delay(n) = clamp(first × factor^(n-1), max)  then jitter
//! n = 1, 2, ... respawn_budget
//! ```
//!
//! The base delay is derived from the respawn number only, so jitter never feeds
//! back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(2),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(1), Duration::from_secs(2));
//! assert_eq!(backoff.next(2), Duration::from_secs(4));
//! assert_eq!(backoff.next(5), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Delay policy applied after each stuck-before-start respawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first respawn.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// first=2s, factor=1.5, max=10s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(2),
            max: Duration::from_secs(10),
            factor: 1.5,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// No pause between respawns.
    pub const fn none() -> Self {
        Self {
            first: Duration::ZERO,
            max: Duration::ZERO,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the pause after the `respawn`-th respawn (1-based; `0` behaves like `1`).
    pub fn next(&self, respawn: u32) -> Duration {
        let exp = respawn.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter,
        }
    }

    #[test]
    fn first_respawn_uses_first_delay() {
        let p = policy(2_000, 10_000, 1.5, JitterPolicy::None);
        assert_eq!(p.next(1), Duration::from_secs(2));
        assert_eq!(p.next(0), Duration::from_secs(2));
    }

    #[test]
    fn delays_grow_then_clamp() {
        let p = policy(100, 1_000, 2.0, JitterPolicy::None);
        assert_eq!(p.next(2), Duration::from_millis(200));
        assert_eq!(p.next(3), Duration::from_millis(400));
        assert_eq!(p.next(10), Duration::from_secs(1));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn none_never_pauses() {
        let p = BackoffPolicy::none();
        for n in 0..8 {
            assert_eq!(p.next(n), Duration::ZERO);
        }
    }

    #[test]
    fn equal_jitter_stays_within_half_and_base() {
        let p = policy(1_000, 30_000, 1.0, JitterPolicy::Equal);
        for n in 1..50 {
            let d = p.next(n);
            assert!(d >= Duration::from_millis(500), "respawn {n}: {d:?}");
            assert!(d <= Duration::from_millis(1_000), "respawn {n}: {d:?}");
        }
    }
}
