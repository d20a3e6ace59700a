//! Stress runs for the session layer.
//!
//! These runs drive many sessions through suspend/resume cycles and
//! concurrent commits, then verify that nothing was lost.

use crate::fixtures::TestRegistry;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use transient_core::{CoreResult, SessionRegistry};
use transient_store::{EntityId, Value};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }
}

impl fmt::Display for StressTestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sessions: {}", self.total_ops)?;
        writeln!(f, "Committed: {}", self.successful_ops)?;
        writeln!(f, "Failed: {}", self.failed_ops)?;
        writeln!(f, "Duration: {:?}", self.duration)?;
        write!(f, "Throughput: {:.2} sessions/sec", self.ops_per_second)
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Sessions started by each thread.
    pub sessions_per_thread: usize,
    /// Suspend/resume rounds between the first and the last mutation.
    pub suspend_rounds: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            sessions_per_thread: 10,
            suspend_rounds: 2,
        }
    }
}

/// Entities written by one suspend/resume run.
#[derive(Debug, Clone)]
pub struct SuspendResumeRun {
    /// Run statistics; one operation per session.
    pub result: StressTestResult,
    /// Every committed entity with the login it was given.
    pub committed: Vec<(EntityId, String)>,
}

/// Drives sessions through `begin → mutate → suspend`, then
/// `resume → mutate → suspend` for each round, then `resume → mutate →
/// commit`, on several threads at once.
///
/// Each session creates one `User` and bumps its `counter` property on
/// every step, so a committed user must end with `counter` equal to
/// `suspend_rounds + 2`.
pub fn run_suspend_resume(registry: &TestRegistry, config: &StressConfig) -> SuspendResumeRun {
    let success = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let registry = registry.registry().clone();
            let success = Arc::clone(&success);
            let failed = Arc::clone(&failed);
            let config = config.clone();
            thread::spawn(move || {
                let mut committed = Vec::new();
                for s in 0..config.sessions_per_thread {
                    let login = format!("user-{t}-{s}");
                    match suspend_resume_session(&registry, &login, config.suspend_rounds) {
                        Ok(id) => {
                            success.fetch_add(1, Ordering::Relaxed);
                            committed.push((id, login));
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                committed
            })
        })
        .collect();

    let mut committed = Vec::new();
    for handle in handles {
        committed.extend(handle.join().expect("Thread panicked"));
    }

    let result = StressTestResult::new(
        success.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    SuspendResumeRun { result, committed }
}

fn suspend_resume_session(
    registry: &SessionRegistry,
    login: &str,
    rounds: usize,
) -> CoreResult<EntityId> {
    let mut session = registry.begin()?;
    let user = session.new_entity("User")?;
    user.set_property(&mut session, "login", Value::from(login))?;
    user.set_property(&mut session, "counter", Value::from(1))?;
    let mut parked = session.suspend()?;

    let mut counter = 1i64;
    for _ in 0..rounds {
        let mut session = registry.resume(parked)?;
        counter += 1;
        user.set_property(&mut session, "counter", Value::from(counter))?;
        parked = registry.suspend(session)?;
    }

    let mut session = registry.resume(parked)?;
    counter += 1;
    user.set_property(&mut session, "counter", Value::from(counter))?;
    session.commit()?;
    user.id()
        .ok_or_else(|| transient_core::CoreError::illegal_state("committed user has no ID"))
}

/// Runs `threads` sessions that each update a different property of the
/// same entity, all starting from the same snapshot.
///
/// Returns the number of sessions that committed.
pub fn run_disjoint_updates(registry: &TestRegistry, entity: EntityId, threads: usize) -> usize {
    let committed = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let registry = registry.registry().clone();
            let committed = Arc::clone(&committed);
            thread::spawn(move || {
                let result = registry.transaction(|session| {
                    let target = session
                        .get_entity(entity)?
                        .ok_or_else(|| transient_core::CoreError::illegal_state("entity missing"))?;
                    target.set_property(session, &format!("field{t}"), Value::from(t as i64))
                });
                if result.is_ok() {
                    committed.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    committed.load(Ordering::Relaxed)
}
