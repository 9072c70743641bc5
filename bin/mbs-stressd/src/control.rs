//! ---
//! mbs_section: "01-core-functionality"
//! mbs_subsection: "binary"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Run control bounded by an op budget, a deadline and ctrl-c."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mbs_rt::RunControl;

/// Harness-side [`RunControl`].
///
/// Keeps going until the op budget is spent, the deadline passes or
/// [`BudgetedRunControl::stop`] is called. Polled from worker threads as well
/// as the coordinator.
#[derive(Debug)]
pub struct BudgetedRunControl {
    max_ops: Option<u64>,
    deadline: Option<Instant>,
    ops: AtomicU64,
    stopped: AtomicBool,
}

impl BudgetedRunControl {
    pub fn new(max_ops: Option<u64>, timeout: Option<Duration>) -> Self {
        Self {
            max_ops,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
            ops: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Ask every poller to wind down.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Bogo ops recorded so far.
    pub fn ops(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }
}

impl RunControl for BudgetedRunControl {
    fn should_continue(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        if let Some(max_ops) = self.max_ops {
            if self.ops() >= max_ops {
                return false;
            }
        }
        match self.deadline {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }

    fn record_progress(&self) {
        self.ops.fetch_add(1, Ordering::Relaxed);
    }
}
