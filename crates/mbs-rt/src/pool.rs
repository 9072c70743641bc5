//! ---
//! mbs_section: "02-stress-runtime"
//! mbs_subsection: "module"
//! mbs_type: "source"
//! mbs_scope: "code"
//! mbs_description: "Membarrier stress runtime."
//! mbs_version: "v0.1.0"
//! mbs_owner: "tbd"
//! ---
use std::io;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::error::SpawnError;

/// Name prefix given to worker threads.
pub const WORKER_THREAD_PREFIX: &str = "mbs-worker-";

/// Boxed thread body handed to a [`WorkerSpawner`].
pub type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Starts OS threads for worker slots.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, slot: usize, body: WorkerBody) -> io::Result<JoinHandle<()>>;
}

/// Spawns named `std::thread`s.
#[derive(Debug, Default, Clone)]
pub struct OsThreadSpawner {
    stack_size: Option<usize>,
}

impl OsThreadSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the worker thread stack size.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl WorkerSpawner for OsThreadSpawner {
    fn spawn(&self, slot: usize, body: WorkerBody) -> io::Result<JoinHandle<()>> {
        let mut builder = thread::Builder::new().name(format!("{WORKER_THREAD_PREFIX}{slot}"));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        builder.spawn(body)
    }
}

/// Outcome of one spawn attempt.
#[derive(Debug)]
struct WorkerHandle {
    slot: usize,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Whether the thread started and therefore needs joining.
    fn started(&self) -> bool {
        self.thread.is_some()
    }
}

/// Totals gathered while joining the pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JoinReport {
    pub attempted: usize,
    pub joined: usize,
    pub panicked: usize,
}

/// Fixed set of worker slots, each started at most once and joined at most once.
#[derive(Debug, Default)]
pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
}

impl WorkerPool {
    pub fn with_capacity(slots: usize) -> Self {
        Self {
            handles: Vec::with_capacity(slots),
        }
    }

    /// Attempt to start `body` for `slot`. The slot is recorded either way.
    pub fn spawn(
        &mut self,
        spawner: &dyn WorkerSpawner,
        slot: usize,
        body: WorkerBody,
    ) -> Result<(), SpawnError> {
        match spawner.spawn(slot, body) {
            Ok(handle) => {
                self.handles.push(WorkerHandle {
                    slot,
                    thread: Some(handle),
                });
                Ok(())
            }
            Err(source) => {
                self.handles.push(WorkerHandle { slot, thread: None });
                Err(SpawnError { slot, source })
            }
        }
    }

    pub fn attempted(&self) -> usize {
        self.handles.len()
    }

    pub fn started(&self) -> usize {
        self.handles.iter().filter(|h| h.started()).count()
    }

    /// Join every started worker, waiting for each in slot order.
    ///
    /// Slots whose spawn failed are skipped; a panicking worker is counted
    /// but does not stop the remaining joins.
    pub fn join(self) -> JoinReport {
        let mut report = JoinReport {
            attempted: self.handles.len(),
            ..JoinReport::default()
        };
        for handle in self.handles {
            let Some(thread) = handle.thread else {
                continue;
            };
            report.joined += 1;
            if thread.join().is_err() {
                report.panicked += 1;
                debug!(slot = handle.slot, "worker panicked before join");
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct RejectOdd(OsThreadSpawner);

    impl WorkerSpawner for RejectOdd {
        fn spawn(&self, slot: usize, body: WorkerBody) -> io::Result<JoinHandle<()>> {
            if slot % 2 == 1 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads left"));
            }
            self.0.spawn(slot, body)
        }
    }

    #[test]
    fn joins_only_started_slots() {
        let ran = Arc::new(AtomicUsize::new(0));
        let spawner = RejectOdd(OsThreadSpawner::new());
        let mut pool = WorkerPool::with_capacity(4);
        let mut failures = Vec::new();
        for slot in 0..4 {
            let ran = ran.clone();
            let body: WorkerBody = Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
            if let Err(err) = pool.spawn(&spawner, slot, body) {
                failures.push(err.slot);
            }
        }
        assert_eq!(failures, vec![1, 3]);
        assert_eq!(pool.attempted(), 4);
        assert_eq!(pool.started(), 2);

        let report = pool.join();
        assert_eq!(
            report,
            JoinReport {
                attempted: 4,
                joined: 2,
                panicked: 0
            }
        );
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_worker_does_not_stop_other_joins() {
        let spawner = OsThreadSpawner::new();
        let mut pool = WorkerPool::with_capacity(2);
        pool.spawn(&spawner, 0, Box::new(|| panic!("worker blew up")))
            .unwrap();
        pool.spawn(&spawner, 1, Box::new(|| {})).unwrap();
        let report = pool.join();
        assert_eq!(report.joined, 2);
        assert_eq!(report.panicked, 1);
    }

    #[test]
    fn threads_are_named_after_their_slot() {
        let spawner = OsThreadSpawner::new().with_stack_size(256 * 1024);
        let handle = spawner
            .spawn(
                7,
                Box::new(|| {
                    assert_eq!(thread::current().name(), Some("mbs-worker-7"));
                }),
            )
            .unwrap();
        handle.join().unwrap();
    }
}
