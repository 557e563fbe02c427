//! Bounded retry with randomized backoff.
//!
//! Many processes often start together (a batch of jobs submitted at once).
//! Sleeping a uniformly random delay between attempts keeps them from
//! retrying in lockstep.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Attempt budget and backoff window for one retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts (at least one is always made).
    pub max_attempts: u32,

    /// Lower bound of the backoff window (inclusive).
    pub min_delay: Duration,

    /// Upper bound of the backoff window (exclusive).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay,
            max_delay,
        }
    }

    /// A single attempt, never sleeps. Used for non-owning in-use probes.
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Draw a backoff delay uniformly from `[min_delay, max_delay)`.
    pub fn backoff(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_micros() as u64;
        let max = self.max_delay.as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(min..max))
    }

    /// Upper bound on the time spent sleeping across all attempts.
    pub fn worst_case_wait(&self) -> Duration {
        self.max_delay.max(self.min_delay) * self.attempts()
    }
}
