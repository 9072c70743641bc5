//! ---
//! mbs_section: "02-stress-runtime"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Membarrier stress runtime."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pacing handle owned by the harness.
///
/// Both methods are polled from the coordinator and every worker thread and
/// must never block.
pub trait RunControl: Send + Sync {
    /// Whether the stressor should keep going.
    fn should_continue(&self) -> bool;

    /// Record one unit of work (one coordinator iteration).
    fn record_progress(&self);
}

/// Stop signal from the coordinator to its workers.
///
/// Written once, read every worker iteration, with relaxed ordering: a worker
/// may run one extra iteration after [`ShutdownFlag::stop`] before it sees
/// the write.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    running: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a flag in the running state.
    pub fn running() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
