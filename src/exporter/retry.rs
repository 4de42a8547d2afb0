// SPDX-License-Identifier: Apache-2.0

//! Reconnect backoff: exponential growth from a small base up to a ceiling,
//! with jitter so a fleet of agents does not reconnect in lockstep. The
//! attempt count is unbounded; the agent never gives up.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

pub struct Backoff {
    config: RetryConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current: config.initial_backoff,
            config,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The next un-jittered delay.
    pub fn base(&self) -> Duration {
        self.current
    }

    /// Consume one attempt: returns the jittered delay to sleep and doubles
    /// the base for the next failure, capped at the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);

        let backoff_ms = self.current.as_millis() as i64;
        let mut v = backoff_ms / 2;
        // avoid div by zero
        if v == 0 {
            v = 1;
        }

        // +/- 25% jitter around the base delay.
        let jitter = rand::random::<i64>().rem_euclid(v) - (v / 2);
        let mut sleep_ms = backoff_ms + jitter;
        if sleep_ms < 1 {
            sleep_ms = 1;
        }

        self.current = std::cmp::min(self.current * 2, self.config.max_backoff);

        Duration::from_millis(sleep_ms as u64)
    }

    /// An authenticated session resets the ladder.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.config.initial_backoff;
    }

    /// Jump straight to the ceiling. Used after authentication rejection so
    /// bad credentials are never retried in a tight loop.
    pub fn escalate(&mut self) {
        self.current = self.config.max_backoff;
    }
}
