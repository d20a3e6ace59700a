//! Session layer configuration.

use std::time::Duration;

/// Configuration for a [`crate::SessionRegistry`].
#[derive(Debug, Clone)]
pub struct Config {
    /// How many times a flush is replayed after a version conflict before
    /// the session is aborted (0 = fail on the first conflict).
    pub max_conflict_retries: usize,

    /// Delay before the first conflict retry. Doubles on each further retry.
    pub conflict_backoff: Duration,

    /// Upper bound for the conflict retry delay.
    pub max_conflict_backoff: Duration,

    /// Whether async entity listeners are delivered on a background thread.
    pub async_listeners: bool,

    /// Queue depth of the async dispatcher above which a warning is logged.
    pub async_queue_warn_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            conflict_backoff: Duration::from_millis(1),
            max_conflict_backoff: Duration::from_millis(20),
            async_listeners: true,
            async_queue_warn_threshold: 10_000,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the conflict retry bound.
    #[must_use]
    pub const fn max_conflict_retries(mut self, retries: usize) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Sets the initial conflict retry delay.
    #[must_use]
    pub const fn conflict_backoff(mut self, backoff: Duration) -> Self {
        self.conflict_backoff = backoff;
        self
    }

    /// Sets the maximum conflict retry delay.
    #[must_use]
    pub const fn max_conflict_backoff(mut self, backoff: Duration) -> Self {
        self.max_conflict_backoff = backoff;
        self
    }

    /// Enables or disables async listener delivery.
    #[must_use]
    pub const fn async_listeners(mut self, value: bool) -> Self {
        self.async_listeners = value;
        self
    }

    /// Sets the async queue warning threshold.
    #[must_use]
    pub const fn async_queue_warn_threshold(mut self, value: usize) -> Self {
        self.async_queue_warn_threshold = value;
        self
    }

    /// Returns the delay to wait before the given retry (1-based).
    #[must_use]
    pub fn backoff_for(&self, retry: usize) -> Duration {
        let mut delay = self.conflict_backoff;
        for _ in 1..retry {
            delay = delay.saturating_mul(2);
            if delay >= self.max_conflict_backoff {
                break;
            }
        }
        delay.min(self.max_conflict_backoff)
    }
}
