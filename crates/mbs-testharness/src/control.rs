//! ---
//! mbs_section: "11-test-harness"
//! mbs_subsection: "02-doubles"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Run controls for driving the coordinator in tests."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mbs_rt::RunControl;

/// Continues until `limit` progress units have been recorded.
#[derive(Debug)]
pub struct CountingRunControl {
    limit: u64,
    progress: AtomicU64,
    checks: AtomicU64,
}

impl CountingRunControl {
    pub fn allowing(limit: u64) -> Self {
        Self {
            limit,
            progress: AtomicU64::new(0),
            checks: AtomicU64::new(0),
        }
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }

    /// `should_continue` calls from any thread.
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::SeqCst)
    }
}

impl RunControl for CountingRunControl {
    fn should_continue(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.progress.load(Ordering::SeqCst) < self.limit
    }

    fn record_progress(&self) {
        self.progress.fetch_add(1, Ordering::SeqCst);
    }
}

type Predicate = Box<dyn Fn() -> bool + Send + Sync>;

/// Continues until a predicate holds or a safety limit elapses.
///
/// Once stopped it stays stopped.
pub struct PredicateRunControl {
    done: Predicate,
    started: Instant,
    limit: Duration,
    stopped: AtomicBool,
    timed_out: AtomicBool,
    progress: AtomicU64,
}

impl PredicateRunControl {
    pub fn until(done: impl Fn() -> bool + Send + Sync + 'static, limit: Duration) -> Self {
        Self {
            done: Box::new(done),
            started: Instant::now(),
            limit,
            stopped: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            progress: AtomicU64::new(0),
        }
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }

    /// Whether the run was ended by the safety limit rather than the predicate.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

impl RunControl for PredicateRunControl {
    fn should_continue(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        if (self.done)() {
            self.stopped.store(true, Ordering::SeqCst);
            return false;
        }
        if self.started.elapsed() >= self.limit {
            self.timed_out.store(true, Ordering::SeqCst);
            self.stopped.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn record_progress(&self) {
        self.progress.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PredicateRunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRunControl")
            .field("limit", &self.limit)
            .field("stopped", &self.stopped)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn counting_control_stops_at_limit() {
        let control = CountingRunControl::allowing(2);
        assert!(control.should_continue());
        control.record_progress();
        assert!(control.should_continue());
        control.record_progress();
        assert!(!control.should_continue());
        assert_eq!(control.progress(), 2);
        assert_eq!(control.checks(), 3);
    }

    #[test]
    fn predicate_control_latches() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = flag.clone();
        let control =
            PredicateRunControl::until(move || seen.load(Ordering::SeqCst), Duration::from_secs(60));
        assert!(control.should_continue());
        flag.store(true, Ordering::SeqCst);
        assert!(!control.should_continue());
        flag.store(false, Ordering::SeqCst);
        assert!(!control.should_continue());
        assert!(!control.timed_out());
    }

    #[test]
    fn predicate_control_times_out() {
        let control = PredicateRunControl::until(|| false, Duration::ZERO);
        assert!(!control.should_continue());
        assert!(control.timed_out());
    }
}
