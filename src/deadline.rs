//! Deadline guard: wall-clock budget with forced termination.
//!
//! A watchdog thread waits for the deadline and terminates the isolate. This
//! interrupts synchronous loops, which an `await`-based timeout cannot.

use deno_core::v8;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Longest budget a deadline accepts.
const MAX_BUDGET: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Absolute expiry for one invocation. Immutable once created.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Expire `budget` from now. Budgets beyond a year are clamped.
    pub fn after(budget: Duration) -> Self {
        let budget = budget.min(MAX_BUDGET);
        let now = Instant::now();
        Self {
            expires_at: now.checked_add(budget).unwrap_or(now),
            budget,
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn has_passed(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Something the watchdog can interrupt.
pub trait Terminate: Send + 'static {
    fn terminate(&self);
}

impl Terminate for v8::IsolateHandle {
    fn terminate(&self) {
        self.terminate_execution();
    }
}

/// Armed watchdog for one invocation.
///
/// The watchdog thread is joined on [`DeadlineGuard::disarm`] or drop, so the
/// isolate handle never outlives the isolate it points at.
pub struct DeadlineGuard {
    cancel: Option<mpsc::Sender<()>>,
    watchdog: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl DeadlineGuard {
    pub fn arm<T: Terminate>(target: T, deadline: Deadline) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let watchdog_fired = fired.clone();
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

        let watchdog = std::thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(deadline.remaining()) {
                watchdog_fired.store(true, Ordering::SeqCst);
                target.terminate();
            }
        });

        Self {
            cancel: Some(cancel_tx),
            watchdog: Some(watchdog),
            fired,
        }
    }

    /// Stop the watchdog and report whether it terminated execution.
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.fired.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(watchdog) = self.watchdog.take() {
            let _ = watchdog.join();
        }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flag(Arc<AtomicBool>);

    impl Terminate for Flag {
        fn terminate(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn deadline_counts_down() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.has_passed());
        assert!(deadline.remaining() <= Duration::from_secs(60));
        assert_eq!(deadline.budget_ms(), 60_000);

        let expired = Deadline::after(Duration::ZERO);
        assert!(expired.has_passed());
        assert_eq!(expired.remaining(), Duration::ZERO);
    }

    #[test]
    fn huge_budgets_are_clamped() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.has_passed());
        assert_eq!(deadline.budget_ms(), MAX_BUDGET.as_millis() as u64);
        assert!(deadline.remaining() <= MAX_BUDGET);
    }

    #[test]
    fn fires_after_budget() {
        let terminated = Arc::new(AtomicBool::new(false));
        let guard = DeadlineGuard::arm(
            Flag(terminated.clone()),
            Deadline::after(Duration::from_millis(20)),
        );
        std::thread::sleep(Duration::from_millis(200));
        assert!(guard.disarm());
        assert!(terminated.load(Ordering::SeqCst));
    }

    #[test]
    fn disarm_before_budget_does_not_fire() {
        let terminated = Arc::new(AtomicBool::new(false));
        let guard = DeadlineGuard::arm(
            Flag(terminated.clone()),
            Deadline::after(Duration::from_secs(30)),
        );
        let started = Instant::now();
        assert!(!guard.disarm());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!terminated.load(Ordering::SeqCst));
    }
}
