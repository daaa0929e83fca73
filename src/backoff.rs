//! Capped exponential reconnect backoff with jitter.
//!
//! The ceiling doubles per attempt from `initial` up to `max`; each delay is
//! drawn uniformly from `[ceiling / 2, ceiling]` so reconnecting clients do
//! not stampede the server in lockstep.

use std::time::Duration;

use rand::Rng;

/// Floor for the first delay, so a zero setting still backs off.
pub const MIN_INITIAL_DELAY: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_INITIAL_DELAY);
        Self { initial, max: max.max(initial), attempt: 0 }
    }

    /// Number of delays handed out since the last [`reset`](Self::reset).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered upper bound for the next delay.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next reconnect; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = jittered(self.ceiling(), &mut rand::rng());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn jittered<R: Rng + ?Sized>(ceiling: Duration, rng: &mut R) -> Duration {
    let half = ceiling / 2;
    let spread = u64::try_from((ceiling - half).as_millis()).unwrap_or(u64::MAX);
    half + Duration::from_millis(rng.random_range(0..=spread))
}

#[cfg(test)]
#[path = "backoff_test.rs"]
mod tests;
