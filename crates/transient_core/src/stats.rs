//! Session statistics.
//!
//! ```rust,ignore
//! let registry = SessionRegistry::new(store);
//! registry.transaction(|s| { /* ... */ Ok(()) })?;
//!
//! let stats = registry.stats().snapshot();
//! println!("committed: {}", stats.sessions_committed);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Session counters of a registry.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct SessionStats {
    sessions_begun: AtomicU64,
    flushes: AtomicU64,
    sessions_committed: AtomicU64,
    sessions_aborted: AtomicU64,
    conflict_retries: AtomicU64,
    constraint_failures: AtomicU64,
    async_events_dispatched: AtomicU64,
}

impl SessionStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begin(&self) {
        self.sessions_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.sessions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict_retry(&self) {
        self.conflict_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_constraint_failure(&self) {
        self.constraint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_async_dispatch(&self) {
        self.async_events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of sessions begun.
    pub fn sessions_begun(&self) -> u64 {
        self.sessions_begun.load(Ordering::Relaxed)
    }

    /// Returns the number of successful intermediate flushes with changes.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Returns the number of committed sessions.
    pub fn sessions_committed(&self) -> u64 {
        self.sessions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of aborted sessions.
    pub fn sessions_aborted(&self) -> u64 {
        self.sessions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of conflict retries.
    pub fn conflict_retries(&self) -> u64 {
        self.conflict_retries.load(Ordering::Relaxed)
    }

    /// Returns the number of flushes rejected by constraints.
    pub fn constraint_failures(&self) -> u64 {
        self.constraint_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of events handed to async listeners.
    pub fn async_events_dispatched(&self) -> u64 {
        self.async_events_dispatched.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_begun: self.sessions_begun(),
            flushes: self.flushes(),
            sessions_committed: self.sessions_committed(),
            sessions_aborted: self.sessions_aborted(),
            conflict_retries: self.conflict_retries(),
            constraint_failures: self.constraint_failures(),
            async_events_dispatched: self.async_events_dispatched(),
        }
    }
}

/// A point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Sessions begun.
    pub sessions_begun: u64,
    /// Successful intermediate flushes.
    pub flushes: u64,
    /// Committed sessions.
    pub sessions_committed: u64,
    /// Aborted sessions.
    pub sessions_aborted: u64,
    /// Conflict retries.
    pub conflict_retries: u64,
    /// Flushes rejected by constraints.
    pub constraint_failures: u64,
    /// Events handed to async listeners.
    pub async_events_dispatched: u64,
}
