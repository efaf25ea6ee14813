//! # Jitter for respawn delays.
//!
//! [`JitterPolicy`] randomizes the pause taken after a respawn so that several
//! pools on one host, all hitting the same spawn stall, do not retry in lockstep.
//! Tests and single-pool hosts usually keep the default [`JitterPolicy::None`].

use rand::Rng;
use std::time::Duration;

/// Randomization applied to respawn delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Exact delay (default).
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay/2 + random[0, delay/2]`.
    Equal,
    /// Random delay in `[base, prev × 3]`, capped at max.
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    ///
    /// `Decorrelated` needs more context and returns the input unchanged here;
    /// see [`apply_decorrelated`](Self::apply_decorrelated).
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => self.full_jitter(delay),
            JitterPolicy::Equal => self.equal_jitter(delay),
            JitterPolicy::Decorrelated => delay,
        }
    }

    /// Applies decorrelated jitter; other policies fall back to `apply(prev)`.
    pub fn apply_decorrelated(&self, base: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(prev);
        }

        let floor = millis(base);
        let ceiling = millis(prev).saturating_mul(3).min(millis(max)).max(floor);
        if floor >= ceiling {
            return base;
        }
        Duration::from_millis(rand::rng().random_range(floor..=ceiling))
    }

    fn full_jitter(&self, delay: Duration) -> Duration {
        match millis(delay) {
            0 => Duration::ZERO,
            ms => Duration::from_millis(rand::rng().random_range(0..=ms)),
        }
    }

    fn equal_jitter(&self, delay: Duration) -> Duration {
        let half = millis(delay) / 2;
        if half == 0 {
            return delay;
        }
        Duration::from_millis(half + rand::rng().random_range(0..=half))
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
